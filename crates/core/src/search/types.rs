//! Search request/response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::ErrorKind;
use crate::registry::SkipReason;
use crate::scoring::ScoredResult;

/// What happened to one provider during a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success { candidates: usize },
    Failed { kind: ErrorKind, error: String },
    SkippedDisabled,
    SkippedAutoDisabled,
    SkippedCircuitOpen,
    SkippedNotConfigured,
    /// The provider supports none of the requested languages.
    SkippedLanguage,
    /// Local or remote throttling; not counted as a failure.
    RateLimited { retry_after_ms: u64 },
    /// Still running when the search deadline passed.
    TimedOut,
}

impl ProviderOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Success { .. } => "success",
            ProviderOutcome::Failed { .. } => "failed",
            ProviderOutcome::SkippedDisabled => "skipped_disabled",
            ProviderOutcome::SkippedAutoDisabled => "skipped_auto_disabled",
            ProviderOutcome::SkippedCircuitOpen => "skipped_circuit_open",
            ProviderOutcome::SkippedNotConfigured => "skipped_not_configured",
            ProviderOutcome::SkippedLanguage => "skipped_language",
            ProviderOutcome::RateLimited { .. } => "rate_limited",
            ProviderOutcome::TimedOut => "timed_out",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            ProviderOutcome::SkippedDisabled
                | ProviderOutcome::SkippedAutoDisabled
                | ProviderOutcome::SkippedCircuitOpen
                | ProviderOutcome::SkippedNotConfigured
                | ProviderOutcome::SkippedLanguage
        )
    }
}

impl From<SkipReason> for ProviderOutcome {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::Disabled => ProviderOutcome::SkippedDisabled,
            SkipReason::AutoDisabled => ProviderOutcome::SkippedAutoDisabled,
            SkipReason::CircuitOpen => ProviderOutcome::SkippedCircuitOpen,
            SkipReason::NotConfigured => ProviderOutcome::SkippedNotConfigured,
        }
    }
}

/// Per-provider diagnostic entry of a search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderDiagnostic {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
    /// Calls made, including retries.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ProviderDiagnostic {
    pub fn skipped(provider: impl Into<String>, outcome: ProviderOutcome) -> Self {
        Self {
            provider: provider.into(),
            outcome,
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// Ranked results and diagnostics of one search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOutput {
    pub results: Vec<ScoredResult>,
    /// Sorted by provider name.
    pub diagnostics: Vec<ProviderDiagnostic>,
}

/// Response of the caller-facing search operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub search_id: Uuid,
    #[serde(flatten)]
    pub output: SearchOutput,
    pub duration_ms: u64,
    /// Served from the result cache without calling providers.
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_serialization() {
        let diag = ProviderDiagnostic {
            provider: "subdl".to_string(),
            outcome: ProviderOutcome::Failed {
                kind: ErrorKind::Auth,
                error: "bad key".to_string(),
            },
            attempts: 1,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["provider"], "subdl");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "auth");
        assert_eq!(json["attempts"], 1);

        let skipped = ProviderDiagnostic::skipped("x", SkipReason::CircuitOpen.into());
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["status"], "skipped_circuit_open");
        assert!(skipped.outcome.is_skipped());
    }

    #[test]
    fn test_outcome_labels_match_serialized_status() {
        let outcomes = vec![
            ProviderOutcome::Success { candidates: 2 },
            ProviderOutcome::RateLimited { retry_after_ms: 5 },
            ProviderOutcome::TimedOut,
            ProviderOutcome::SkippedLanguage,
        ];
        for outcome in outcomes {
            let json = serde_json::to_value(&outcome).unwrap();
            assert_eq!(json["status"], outcome.label());
        }
    }
}
