//! Shared HTTP plumbing for providers backed by a web API.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::ProviderError;

const USER_AGENT: &str = concat!("subfetch/", env!("CARGO_PKG_VERSION"));

/// Maximum body excerpt carried in error messages.
const ERROR_BODY_CHARS: usize = 200;

/// HTTP client created on first use.
pub struct LazyClient {
    cell: OnceCell<Client>,
    timeout: Duration,
}

impl LazyClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cell: OnceCell::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the client, building it on first call.
    pub async fn get(&self) -> Result<&Client, ProviderError> {
        self.cell
            .get_or_try_init(|| async {
                Client::builder()
                    .timeout(self.timeout)
                    .user_agent(USER_AGENT)
                    .build()
                    .map_err(|e| {
                        ProviderError::Transport(format!("Failed to create HTTP client: {}", e))
                    })
            })
            .await
    }
}

impl std::fmt::Debug for LazyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyClient")
            .field("initialized", &self.cell.initialized())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Map a reqwest failure into the provider taxonomy.
pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if e.is_decode() {
        ProviderError::Parse(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// `Retry-After` in milliseconds, defaulting to one minute.
fn retry_after_ms(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(60_000)
}

/// Classify a non-success HTTP status.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(ERROR_BODY_CHARS).collect();

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Auth(format!("HTTP {}: {}", status, excerpt))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_ms },
        StatusCode::NOT_FOUND => ProviderError::NotFound(format!("HTTP {}", status)),
        s if s.is_server_error() => ProviderError::Transport(format!("HTTP {}: {}", status, excerpt)),
        _ => ProviderError::Rejected(format!("HTTP {}: {}", status, excerpt)),
    })
}

/// Send a request and decode a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    let response = check_status(response).await?;
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Send a request and return the raw body.
pub(crate) async fn send_bytes(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Vec<u8>, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    let response = check_status(response).await?;
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_client_initializes_once() {
        let client = LazyClient::new(Duration::from_secs(5));
        assert!(!client.cell.initialized());

        let first = client.get().await.unwrap() as *const Client;
        let second = client.get().await.unwrap() as *const Client;

        assert!(client.cell.initialized());
        assert_eq!(first, second);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), 60_000);

        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), 7_000);

        headers.insert(RETRY_AFTER, "99999999999999999".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), u64::MAX);
    }
}
