use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use subfetch_core::{EngineError, ProviderError, SanitizedConfig};
use tracing::error;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Engine error rendered as a JSON error body with a matching status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            EngineError::Provider(p) => provider_status(p),
            EngineError::Registry(_)
            | EngineError::Store(_)
            | EngineError::Config(_)
            | EngineError::Plugin(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, "Request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

fn provider_status(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::Transport(_)
        | ProviderError::Auth(_)
        | ProviderError::Parse(_)
        | ProviderError::Rejected(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::ProviderNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::ProviderUnavailable {
                    provider: "x".into(),
                    reason: "auto-disabled".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::InvalidValue {
                    key: "scoring.bogus".into(),
                    message: "unknown weight".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ProviderError::RateLimited { retry_after_ms: 10 }.into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ProviderError::Timeout(Duration::from_secs(1)).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (ProviderError::Auth("bad".into()).into(), StatusCode::BAD_GATEWAY),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status, expected);
        }
    }
}
