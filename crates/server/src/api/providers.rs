//! Provider management handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use subfetch_core::{
    reliability::HealthRecord, ConnectionTest, ProviderDescriptor, ProviderStatus,
    ScoringWeights,
};

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: u32,
}

#[derive(Debug, Deserialize)]
pub struct ScoreModifierRequest {
    pub score_modifier: i64,
}

#[derive(Debug, Deserialize)]
pub struct WeightRequest {
    pub value: i64,
}

/// GET /api/v1/providers
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatus>> {
    Json(state.engine().list_providers().await)
}

/// GET /api/v1/providers/{name}
pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderStatus>, ApiError> {
    Ok(Json(state.engine().provider_status(&name).await?))
}

/// POST /api/v1/providers/{name}/enable
pub async fn enable_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderDescriptor>, ApiError> {
    Ok(Json(state.engine().set_enabled(&name, true)?))
}

/// POST /api/v1/providers/{name}/disable
pub async fn disable_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderDescriptor>, ApiError> {
    Ok(Json(state.engine().set_enabled(&name, false)?))
}

/// PUT /api/v1/providers/{name}/priority
pub async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<PriorityRequest>,
) -> Result<Json<ProviderDescriptor>, ApiError> {
    Ok(Json(state.engine().set_priority(&name, body.priority)?))
}

/// PUT /api/v1/providers/{name}/score-modifier
pub async fn set_score_modifier(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ScoreModifierRequest>,
) -> Result<Json<ProviderDescriptor>, ApiError> {
    Ok(Json(
        state
            .engine()
            .set_score_modifier(&name, body.score_modifier)?,
    ))
}

/// POST /api/v1/providers/{name}/reenable
///
/// Clear auto-disable and reset the circuit breaker.
pub async fn reenable_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<HealthRecord>, ApiError> {
    Ok(Json(state.engine().reenable(&name)?))
}

/// POST /api/v1/providers/{name}/test
///
/// A failed connection test is still a 200; the body carries the error.
pub async fn test_provider(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionTest>, ApiError> {
    Ok(Json(state.engine().test_provider(&name).await?))
}

/// GET /api/v1/scoring/weights
pub async fn get_weights(State(state): State<Arc<AppState>>) -> Json<ScoringWeights> {
    Json(state.engine().weights())
}

/// PUT /api/v1/scoring/weights/{key}
pub async fn set_weight(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<WeightRequest>,
) -> Result<Json<ScoringWeights>, ApiError> {
    Ok(Json(state.engine().set_weight(&key, body.value)?))
}
