//! Subtitle provider abstraction.
//!
//! This module provides the `Provider` trait every subtitle source implements,
//! the error taxonomy providers report through, and the built-in providers.

mod archive;
pub mod builtin;
mod credentials;
pub(crate) mod http;
pub mod release;
mod types;

pub use archive::extract_subtitle;
pub use credentials::{resolve_credentials, Credentials};
pub use http::LazyClient;
pub use types::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors a provider reports to the orchestrator.
///
/// Providers convert every network/parse failure into one of these before it
/// leaves `search`/`download`. "No results" is never an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Coarse error class, reported in diagnostics and health records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    Auth,
    RateLimited,
    Parse,
    NotConfigured,
    NotFound,
    Rejected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Parse => "parse",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Rejected => "rejected",
        }
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transport(_) => ErrorKind::Transport,
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::Parse(_) => ErrorKind::Parse,
            ProviderError::NotConfigured(_) => ErrorKind::NotConfigured,
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::Rejected(_) => ErrorKind::Rejected,
        }
    }

    /// Transport-class errors (network, timeout, malformed payload) may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_) | ProviderError::Timeout(_) | ProviderError::Parse(_)
        )
    }

    /// Whether this outcome should count against the circuit breaker and health record.
    ///
    /// Throttling, missing configuration and missing content are not provider faults.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::NotConfigured(_)
                | ProviderError::NotFound(_)
        )
    }
}

/// Trait for subtitle providers.
///
/// Implementations are stateless across calls apart from lazily initialized
/// connections, and must return promptly when their future is dropped.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Declared metadata: name, languages, config fields, limits.
    fn info(&self) -> &ProviderInfo;

    /// Provider name, shorthand for `info().name`.
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Search for candidates. An empty list means no results.
    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError>;

    /// Fetch the raw subtitle content for a candidate.
    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError>;

    /// Connectivity check used by the management surface.
    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.search(&Query::new("The Matrix").with_year(1999))
            .await
            .map(|_| ())
    }
}
