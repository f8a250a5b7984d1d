//! Search orchestration: rate limiting, fan-out, result caching.

mod cache;
mod orchestrator;
mod rate_limiter;
mod types;

pub use cache::{cache_key, normalize_query, ResultCache};
pub use orchestrator::{summarize, OrchestratorConfig, SearchOrchestrator};
pub use rate_limiter::{RateLimitStatus, RateLimiterPool, TokenBucket};
pub use types::{ProviderDiagnostic, ProviderOutcome, SearchOutput, SearchResponse};
