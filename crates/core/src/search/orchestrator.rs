//! Concurrent fan-out of one query to every dispatchable provider.
//!
//! Each provider call runs in its own task, gated by a shared worker-pool
//! semaphore, the provider's circuit breaker and its rate limiter. The
//! collector waits for the tasks up to a single overall deadline; whatever is
//! still running then is aborted and reported as timed out.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiterPool;
use super::types::{ProviderDiagnostic, ProviderOutcome, SearchOutput};
use crate::engine::EngineError;
use crate::metrics;
use crate::provider::{Candidate, ProviderError, ProviderInfo, Query};
use crate::registry::{ProviderRegistry, RegisteredProvider};
use crate::reliability::{CircuitBreaker, CircuitBreakers, HealthMonitor};
use crate::scoring::{self, ProviderRank, ScoredResult, ScoringWeights};

const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
/// Stand-in for "no deadline" when a budget does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Orchestrator limits.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Maximum provider calls in flight across all searches and downloads.
    pub max_concurrency: usize,
    /// Overall search deadline, independent of provider timeouts.
    pub deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deadline: Duration::from_secs(20),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF)
}

fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or(now + FAR_FUTURE)
}

/// Releases a claimed breaker slot if the call is cancelled before its
/// outcome is recorded.
struct BreakerClaim {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl BreakerClaim {
    fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn settle(mut self) -> Arc<CircuitBreaker> {
        self.settled = true;
        self.breaker.clone()
    }
}

impl Drop for BreakerClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_neutral();
        }
    }
}

/// Result of one provider call, retries included.
struct CallReport<T> {
    result: Result<T, ProviderError>,
    attempts: u32,
    elapsed: Duration,
}

/// Shared reliability state every provider call goes through.
#[derive(Clone)]
struct Dispatcher {
    breakers: Arc<CircuitBreakers>,
    health: Arc<HealthMonitor>,
    limiter: Arc<RateLimiterPool>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Run `op` under the rate limiter, the provider timeout and its retry
    /// policy. Gives up once `deadline` leaves no room for another attempt.
    ///
    /// A worker-pool permit is taken only after the rate limiter grants a
    /// token and is released before any backoff sleep.
    async fn call<T, F, Fut>(&self, info: &ProviderInfo, deadline: Instant, mut op: F) -> CallReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let timeout = info.timeout();
        let mut attempts = 0u32;
        loop {
            let max_wait = deadline.saturating_duration_since(Instant::now()).min(timeout);
            if let Err(e) = self.limiter.acquire(&info.name, max_wait).await {
                return CallReport {
                    result: Err(e),
                    attempts,
                    elapsed: started.elapsed(),
                };
            }

            let Ok(permit) = self.permits.acquire().await else {
                return CallReport {
                    result: Err(ProviderError::Transport("worker pool closed".to_string())),
                    attempts,
                    elapsed: started.elapsed(),
                };
            };

            attempts += 1;
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };
            drop(permit);

            match result {
                Err(e) if e.is_retryable() && attempts <= info.max_retries => {
                    let delay = backoff(attempts);
                    if deadline_after(delay) >= deadline {
                        return CallReport {
                            result: Err(e),
                            attempts,
                            elapsed: started.elapsed(),
                        };
                    }
                    debug!(
                        provider = %info.name,
                        attempt = attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying provider call"
                    );
                    metrics::PROVIDER_RETRIES
                        .with_label_values(&[info.name.as_str()])
                        .inc();
                    tokio::time::sleep(delay).await;
                }
                result => {
                    return CallReport {
                        result,
                        attempts,
                        elapsed: started.elapsed(),
                    }
                }
            }
        }
    }

    /// Feed a finished call into the breaker and the health record.
    fn record<T>(&self, name: &str, claim: BreakerClaim, report: &CallReport<T>) {
        let breaker = claim.settle();
        match &report.result {
            Ok(_) => {
                breaker.record_success();
                self.health.record_success(name, report.elapsed, Utc::now());
            }
            Err(e) if e.counts_as_failure() => {
                breaker.record_failure();
                let threshold = breaker.policy().failure_threshold;
                self.health
                    .record_failure(name, report.elapsed, e, threshold, Utc::now());
            }
            Err(_) => breaker.record_neutral(),
        }
    }
}

fn observe(provider: &str, operation: &str, outcome: &str, elapsed: Duration) {
    metrics::PROVIDER_CALLS
        .with_label_values(&[provider, operation, outcome])
        .inc();
    metrics::PROVIDER_CALL_DURATION
        .with_label_values(&[provider, operation])
        .observe(elapsed.as_secs_f64());
}

/// What a search task hands back to the collector.
struct TaskReport {
    diagnostic: ProviderDiagnostic,
    candidates: Vec<Candidate>,
    rank: ProviderRank,
}

/// Fans queries out to providers and ranks what comes back.
pub struct SearchOrchestrator {
    registry: Arc<ProviderRegistry>,
    dispatcher: Dispatcher,
    config: OrchestratorConfig,
    weights: RwLock<ScoringWeights>,
}

impl SearchOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakers>,
        health: Arc<HealthMonitor>,
        limiter: Arc<RateLimiterPool>,
        weights: ScoringWeights,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher: Dispatcher {
                breakers,
                health,
                limiter,
                permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            },
            config,
            weights: RwLock::new(weights),
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    pub fn weights(&self) -> ScoringWeights {
        *self.weights.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_weights(&self, weights: ScoringWeights) {
        *self.weights.write().unwrap_or_else(|e| e.into_inner()) = weights;
    }

    /// Search every dispatchable provider and rank the merged candidates.
    ///
    /// Never fails: provider errors, skips and timeouts end up in the
    /// diagnostics, and the results may be empty.
    pub async fn search(&self, query: &Query) -> SearchOutput {
        let deadline = deadline_after(self.config.deadline);
        let plan = self.registry.dispatch_plan(
            &self.dispatcher.health,
            &self.dispatcher.breakers,
            Utc::now(),
        );

        let mut diagnostics: Vec<ProviderDiagnostic> = plan
            .skipped
            .into_iter()
            .map(|(name, reason)| ProviderDiagnostic::skipped(name, reason.into()))
            .collect();

        let query = Arc::new(query.clone());
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, String> = HashMap::new();

        for entry in plan.dispatchable {
            let info = &entry.descriptor.info;
            let speaks_any = query.languages.is_empty()
                || query.languages.iter().any(|l| info.supports_language(l));
            if !speaks_any {
                diagnostics.push(ProviderDiagnostic::skipped(
                    entry.name(),
                    ProviderOutcome::SkippedLanguage,
                ));
                continue;
            }

            let name = entry.name().to_string();
            let task = search_provider(
                self.dispatcher.clone(),
                entry,
                query.clone(),
                deadline,
            );
            let handle = tasks.spawn(task);
            pending.insert(handle.id(), name);
        }

        debug!(
            title = %query.title,
            providers = pending.len(),
            skipped = diagnostics.len(),
            "Dispatching search"
        );

        let mut collected: Vec<(Candidate, ProviderRank)> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, report)))) => {
                    pending.remove(&id);
                    collected.extend(
                        report
                            .candidates
                            .into_iter()
                            .filter(|c| query.wants_language(&c.language))
                            .map(|c| (c, report.rank)),
                    );
                    diagnostics.push(report.diagnostic);
                }
                Ok(Some(Err(e))) => {
                    let name = pending.remove(&e.id()).unwrap_or_default();
                    warn!(provider = %name, error = %e, "Provider task failed");
                    diagnostics.push(ProviderDiagnostic {
                        provider: name,
                        outcome: ProviderOutcome::Failed {
                            kind: crate::provider::ErrorKind::Transport,
                            error: format!("provider task failed: {}", e),
                        },
                        attempts: 0,
                        duration_ms: 0,
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        for (_, name) in pending.drain() {
            info!(provider = %name, "Provider exceeded search deadline, dropped");
            observe(&name, "search", "timed_out", self.config.deadline);
            diagnostics.push(ProviderDiagnostic {
                provider: name,
                outcome: ProviderOutcome::TimedOut,
                attempts: 0,
                duration_ms: self.config.deadline.as_millis() as u64,
            });
        }

        diagnostics.sort_by(|a, b| a.provider.cmp(&b.provider));
        let results = scoring::rank(&query, collected, &self.weights());
        metrics::SEARCH_RESULTS
            .with_label_values(&[])
            .observe(results.len() as f64);

        SearchOutput {
            results,
            diagnostics,
        }
    }

    /// Fetch the subtitle bytes of a ranked result from its provider.
    pub async fn download(&self, result: &ScoredResult) -> Result<Vec<u8>, EngineError> {
        let candidate = &result.candidate;
        let name = candidate.provider.as_str();
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::ProviderNotFound(name.to_string()))?;

        let unavailable = |reason: &str| EngineError::ProviderUnavailable {
            provider: name.to_string(),
            reason: reason.to_string(),
        };
        if !entry.descriptor.enabled {
            return Err(unavailable("disabled"));
        }
        if !entry.init.is_ready() {
            return Err(unavailable("not configured"));
        }
        if self.dispatcher.health.is_auto_disabled(name, Utc::now()) {
            return Err(unavailable("auto-disabled"));
        }

        let breaker = self.dispatcher.breakers.get(name);
        if !breaker.try_acquire() {
            return Err(unavailable("circuit open"));
        }
        let claim = BreakerClaim::new(breaker);

        let info = &entry.descriptor.info;
        let budget = info.timeout().saturating_mul(info.max_retries.saturating_add(2));
        let provider = entry.provider.clone();
        let report = self
            .dispatcher
            .call(info, deadline_after(budget), || provider.download(candidate))
            .await;
        self.dispatcher.record(name, claim, &report);

        match report.result {
            Ok(bytes) => {
                observe(name, "download", "success", report.elapsed);
                debug!(provider = %name, bytes = bytes.len(), "Downloaded subtitle");
                Ok(bytes)
            }
            Err(e) => {
                let outcome = match e {
                    ProviderError::RateLimited { .. } => "rate_limited",
                    _ => "failed",
                };
                observe(name, "download", outcome, report.elapsed);
                warn!(provider = %name, error = %e, "Download failed");
                Err(EngineError::Provider(e))
            }
        }
    }
}

/// One provider's share of a search.
async fn search_provider(
    dispatcher: Dispatcher,
    entry: Arc<RegisteredProvider>,
    query: Arc<Query>,
    deadline: Instant,
) -> TaskReport {
    let name = entry.name().to_string();
    let rank = ProviderRank {
        priority: entry.descriptor.priority,
        score_modifier: entry.descriptor.score_modifier,
    };
    let report = |outcome, attempts, elapsed: Duration| TaskReport {
        diagnostic: ProviderDiagnostic {
            provider: name.clone(),
            outcome,
            attempts,
            duration_ms: elapsed.as_millis() as u64,
        },
        candidates: Vec::new(),
        rank,
    };

    let breaker = dispatcher.breakers.get(&name);
    if !breaker.try_acquire() {
        debug!(provider = %name, "Circuit claimed by another call, skipping");
        return report(ProviderOutcome::SkippedCircuitOpen, 0, Duration::ZERO);
    }
    let claim = BreakerClaim::new(breaker);

    let provider = entry.provider.clone();
    let call = dispatcher
        .call(&entry.descriptor.info, deadline, || provider.search(&query))
        .await;
    dispatcher.record(&name, claim, &call);

    match call.result {
        Ok(candidates) => {
            debug!(
                provider = %name,
                candidates = candidates.len(),
                duration_ms = call.elapsed.as_millis() as u64,
                "Provider search completed"
            );
            observe(&name, "search", "success", call.elapsed);
            let mut done = report(
                ProviderOutcome::Success {
                    candidates: candidates.len(),
                },
                call.attempts,
                call.elapsed,
            );
            done.candidates = candidates;
            done
        }
        Err(ProviderError::RateLimited { retry_after_ms }) => {
            debug!(provider = %name, retry_after_ms, "Provider rate limited, skipped this round");
            observe(&name, "search", "rate_limited", call.elapsed);
            report(
                ProviderOutcome::RateLimited { retry_after_ms },
                call.attempts,
                call.elapsed,
            )
        }
        Err(e) => {
            warn!(
                provider = %name,
                error = %e,
                attempts = call.attempts,
                "Provider search failed"
            );
            observe(&name, "search", "failed", call.elapsed);
            report(
                ProviderOutcome::Failed {
                    kind: e.kind(),
                    error: e.to_string(),
                },
                call.attempts,
                call.elapsed,
            )
        }
    }
}

/// Group diagnostics by outcome label, for log summaries.
pub fn summarize(diagnostics: &[ProviderDiagnostic]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for diag in diagnostics {
        *counts.entry(diag.outcome.label()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ErrorKind, ProviderOrigin, RateLimitPolicy};
    use crate::registry::InitStatus;
    use crate::reliability::{BreakerPolicy, CircuitStatus, HealthPolicy};
    use crate::store::MemoryHealthStore;
    use crate::testing::{fixtures, MockProvider};

    struct Harness {
        registry: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakers>,
        health: Arc<HealthMonitor>,
        orchestrator: SearchOrchestrator,
    }

    fn harness(config: OrchestratorConfig, policy: BreakerPolicy) -> Harness {
        let registry = Arc::new(ProviderRegistry::new());
        let breakers = Arc::new(CircuitBreakers::new(policy));
        let health = Arc::new(
            HealthMonitor::load(HealthPolicy::default(), Arc::new(MemoryHealthStore::new()))
                .unwrap(),
        );
        let orchestrator = SearchOrchestrator::new(
            registry.clone(),
            breakers.clone(),
            health.clone(),
            Arc::new(RateLimiterPool::new()),
            ScoringWeights::default(),
            config,
        );
        Harness {
            registry,
            breakers,
            health,
            orchestrator,
        }
    }

    fn default_harness() -> Harness {
        harness(OrchestratorConfig::default(), BreakerPolicy::default())
    }

    fn add(h: &Harness, mock: MockProvider) -> Arc<MockProvider> {
        let mock = Arc::new(mock);
        let descriptor = mock.descriptor(ProviderOrigin::Builtin);
        h.registry
            .register(RegisteredProvider::new(
                mock.clone(),
                descriptor,
                InitStatus::Ready,
            ))
            .unwrap();
        mock
    }

    fn outcome<'a>(output: &'a SearchOutput, provider: &str) -> &'a ProviderDiagnostic {
        output
            .diagnostics
            .iter()
            .find(|d| d.provider == provider)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_and_ranks_across_providers() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("alpha").with_results(vec![fixtures::candidate(
                "alpha",
                "a1",
                "Other.Show.S01E03.720p-GRP",
            )]),
        );
        add(
            &h,
            MockProvider::new("beta").with_results(vec![fixtures::candidate(
                "beta",
                "b1",
                "Example.Show.S01E03.720p-GRP",
            )]),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.results[0].candidate.provider, "beta");
        assert!(output.results[0].score > output.results[1].score);
        assert_eq!(
            outcome(&output, "alpha").outcome,
            ProviderOutcome::Success { candidates: 1 }
        );
        assert_eq!(
            output.diagnostics.iter().map(|d| d.provider.as_str()).collect::<Vec<_>>(),
            vec!["alpha", "beta"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("broken").with_error(ProviderError::Auth("bad key".into())),
        );
        add(
            &h,
            MockProvider::new("good").with_results(vec![fixtures::candidate(
                "good",
                "g1",
                "Example.Show.S01E03",
            )]),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(output.results.len(), 1);
        match &outcome(&output, "broken").outcome {
            ProviderOutcome::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::Auth),
            other => panic!("Expected Failed, got {:?}", other),
        }
        let record = h.health.get("broken").unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.last_error_kind, Some(ErrorKind::Auth));
        assert_eq!(h.health.get("good").unwrap().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failing_returns_empty_with_diagnostics() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("a").with_error(ProviderError::Transport("down".into())),
        );
        add(
            &h,
            MockProvider::new("b").with_error(ProviderError::Parse("garbage".into())),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert!(output.results.is_empty());
        assert_eq!(output.diagnostics.len(), 2);
        assert!(output
            .diagnostics
            .iter()
            .all(|d| matches!(d.outcome, ProviderOutcome::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_errors_only() {
        let h = default_harness();
        let flaky = add(&h, MockProvider::new("flaky").with_retries(2));
        flaky.push_error(ProviderError::Transport("reset".into()));
        flaky.push_error(ProviderError::Timeout(Duration::from_secs(1)));
        flaky.set_results(vec![fixtures::candidate("flaky", "1", "Example.Show.S01E03")]);

        let auth = add(
            &h,
            MockProvider::new("auth")
                .with_retries(2)
                .with_error(ProviderError::Auth("denied".into())),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        let diag = outcome(&output, "flaky");
        assert_eq!(diag.outcome, ProviderOutcome::Success { candidates: 1 });
        assert_eq!(diag.attempts, 3);
        assert_eq!(flaky.search_count(), 3);

        assert_eq!(outcome(&output, "auth").attempts, 1);
        assert_eq!(auth.search_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_reports_last_error() {
        let h = default_harness();
        let mock = add(
            &h,
            MockProvider::new("down")
                .with_retries(1)
                .with_error(ProviderError::Transport("refused".into())),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        let diag = outcome(&output, "down");
        assert_eq!(diag.attempts, 2);
        assert_eq!(mock.search_count(), 2);
        // One search, one failure, regardless of retries.
        assert_eq!(h.health.get("down").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_is_transport_failure() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("slow")
                .with_timeout(1)
                .with_delay(Duration::from_secs(5)),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        match &outcome(&output, "slow").outcome {
            ProviderOutcome::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_drops_stragglers() {
        let h = harness(
            OrchestratorConfig {
                max_concurrency: 8,
                deadline: Duration::from_secs(2),
            },
            BreakerPolicy::default(),
        );
        for name in ["one", "two"] {
            add(
                &h,
                MockProvider::new(name)
                    .with_delay(Duration::from_millis(200))
                    .with_results(vec![fixtures::candidate(name, "1", "Example.Show.S01E03")]),
            );
        }
        add(
            &h,
            MockProvider::new("slow")
                .with_delay(Duration::from_secs(10))
                .with_timeout(30)
                .with_results(vec![fixtures::candidate("slow", "1", "Example.Show.S01E03")]),
        );

        let started = Instant::now();
        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        let elapsed = started.elapsed();

        assert_eq!(elapsed, Duration::from_secs(2));
        assert_eq!(output.results.len(), 2);
        assert!(output.results.iter().all(|r| r.candidate.provider != "slow"));
        assert_eq!(outcome(&output, "slow").outcome, ProviderOutcome::TimedOut);

        // Cancelled calls do not count against the provider.
        tokio::task::yield_now().await;
        assert!(h.health.get("slow").is_none());
        assert_eq!(h.breakers.get("slow").status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounds_concurrency() {
        let h = harness(
            OrchestratorConfig {
                max_concurrency: 2,
                deadline: Duration::from_secs(10),
            },
            BreakerPolicy::default(),
        );
        for i in 0..6 {
            add(
                &h,
                MockProvider::new(&format!("p{}", i)).with_delay(Duration::from_millis(100)),
            );
        }

        let started = Instant::now();
        let output = h.orchestrator.search(&fixtures::episode_query()).await;

        // Six 100ms calls, two at a time.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(summarize(&output.diagnostics).get("success"), Some(&6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_provider_is_skipped_not_failed() {
        let h = default_harness();
        let limited = add(
            &h,
            MockProvider::new("limited").with_rate_limit(RateLimitPolicy::new(1, 3600)),
        );
        h.orchestrator
            .dispatcher
            .limiter
            .configure("limited", RateLimitPolicy::new(1, 3600))
            .await;

        h.orchestrator.search(&fixtures::episode_query()).await;
        let output = h.orchestrator.search(&fixtures::episode_query()).await;

        assert!(matches!(
            outcome(&output, "limited").outcome,
            ProviderOutcome::RateLimited { .. }
        ));
        assert_eq!(limited.search_count(), 1);
        assert_eq!(h.breakers.get("limited").snapshot().consecutive_failures, 0);
        assert_eq!(h.health.get("limited").unwrap().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_throttle_is_neutral() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("throttled").with_error(ProviderError::RateLimited {
                retry_after_ms: 1000,
            }),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "throttled").outcome,
            ProviderOutcome::RateLimited {
                retry_after_ms: 1000
            }
        );
        assert!(h.health.get("throttled").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_then_trial_after_cooldown() {
        let h = harness(
            OrchestratorConfig::default(),
            BreakerPolicy {
                failure_threshold: 2,
                cooldown: Duration::from_secs(30),
            },
        );
        let mock = add(
            &h,
            MockProvider::new("flaky").with_error(ProviderError::Transport("down".into())),
        );

        h.orchestrator.search(&fixtures::episode_query()).await;
        h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(h.breakers.get("flaky").status(), CircuitStatus::Open);

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "flaky").outcome,
            ProviderOutcome::SkippedCircuitOpen
        );
        assert_eq!(mock.search_count(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        mock.set_error(None);
        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "flaky").outcome,
            ProviderOutcome::Success { candidates: 0 }
        );
        assert_eq!(h.breakers.get("flaky").status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_failure_auto_disables() {
        let h = harness(
            OrchestratorConfig::default(),
            BreakerPolicy {
                failure_threshold: 2,
                cooldown: Duration::from_secs(1),
            },
        );
        let mock = add(
            &h,
            MockProvider::new("dead").with_error(ProviderError::Transport("down".into())),
        );

        // Two failures open the circuit, two failed trials reach 2x threshold.
        h.orchestrator.search(&fixtures::episode_query()).await;
        h.orchestrator.search(&fixtures::episode_query()).await;
        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(1)).await;
            h.orchestrator.search(&fixtures::episode_query()).await;
        }
        assert_eq!(mock.search_count(), 4);
        assert!(h.health.get("dead").unwrap().auto_disabled);

        tokio::time::advance(Duration::from_secs(1)).await;
        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "dead").outcome,
            ProviderOutcome::SkippedAutoDisabled
        );
        assert_eq!(mock.search_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_language_filters() {
        let h = default_harness();
        let mut info = ProviderInfo::new("japanese");
        info.languages = vec!["ja".to_string()];
        info.max_retries = 0;
        info.rate_limit = RateLimitPolicy::new(1000, 1);
        let japanese = add(&h, MockProvider::with_info(info));

        let mut french = fixtures::candidate("multi", "fr", "Example.Show.S01E03");
        french.language = "fr".to_string();
        add(
            &h,
            MockProvider::new("multi").with_results(vec![
                fixtures::candidate("multi", "en", "Example.Show.S01E03"),
                french,
            ]),
        );

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "japanese").outcome,
            ProviderOutcome::SkippedLanguage
        );
        assert_eq!(japanese.search_count(), 0);
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].candidate.language, "en");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_provider_reported() {
        let h = default_harness();
        let mock = add(&h, MockProvider::new("off"));
        h.registry
            .update_descriptor("off", |d| d.enabled = false)
            .unwrap();

        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        assert_eq!(
            outcome(&output, "off").outcome,
            ProviderOutcome::SkippedDisabled
        );
        assert_eq!(mock.search_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_records_outcome() {
        let h = default_harness();
        let mock = add(&h, MockProvider::new("dl").with_content(b"WEBVTT\n"));
        let candidate = fixtures::candidate("dl", "1", "Example.Show.S01E03");
        let result = scoring::rank(
            &fixtures::episode_query(),
            vec![(candidate, ProviderRank::default())],
            &ScoringWeights::default(),
        )
        .remove(0);

        let bytes = h.orchestrator.download(&result).await.unwrap();
        assert_eq!(bytes, b"WEBVTT\n");
        assert_eq!(mock.download_count(), 1);
        assert_eq!(h.health.get("dl").unwrap().successes, 1);

        mock.set_error(Some(ProviderError::Auth("expired".into())));
        let err = h.orchestrator.download(&result).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(ProviderError::Auth(_))));
        assert_eq!(h.health.get("dl").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_unknown_or_disabled_provider() {
        let h = default_harness();
        add(&h, MockProvider::new("off"));
        h.registry
            .update_descriptor("off", |d| d.enabled = false)
            .unwrap();

        let mut result = scoring::rank(
            &fixtures::episode_query(),
            vec![(
                fixtures::candidate("off", "1", "Example.Show.S01E03"),
                ProviderRank::default(),
            )],
            &ScoringWeights::default(),
        )
        .remove(0);

        assert!(matches!(
            h.orchestrator.download(&result).await,
            Err(EngineError::ProviderUnavailable { .. })
        ));

        result.candidate.provider = "ghost".to_string();
        assert!(matches!(
            h.orchestrator.download(&result).await,
            Err(EngineError::ProviderNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_with_huge_timeout() {
        let h = default_harness();
        add(
            &h,
            MockProvider::new("patient")
                .with_timeout(i64::MAX as u64)
                .with_retries(u32::MAX)
                .with_content(b"1\n"),
        );
        let result = scoring::rank(
            &fixtures::episode_query(),
            vec![(
                fixtures::candidate("patient", "1", "Example.Show.S01E03"),
                ProviderRank::default(),
            )],
            &ScoringWeights::default(),
        )
        .remove(0);

        assert_eq!(h.orchestrator.download(&result).await.unwrap(), b"1\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_provider_does_not_hold_worker_slot() {
        let h = harness(
            OrchestratorConfig {
                max_concurrency: 1,
                deadline: Duration::from_secs(5),
            },
            BreakerPolicy::default(),
        );
        let limiter = &h.orchestrator.dispatcher.limiter;
        limiter.configure("throttled", RateLimitPolicy::new(1, 1)).await;
        limiter.acquire("throttled", Duration::ZERO).await.unwrap();

        add(
            &h,
            MockProvider::new("throttled")
                .with_priority(1)
                .with_delay(Duration::from_millis(100)),
        );
        add(
            &h,
            MockProvider::new("fast")
                .with_priority(2)
                .with_delay(Duration::from_millis(100)),
        );

        let started = Instant::now();
        let output = h.orchestrator.search(&fixtures::episode_query()).await;
        let elapsed = started.elapsed();

        // "fast" runs while "throttled" waits for its token, not after it.
        assert_eq!(summarize(&output.diagnostics).get("success"), Some(&2));
        assert!(elapsed >= Duration::from_millis(1100));
        assert!(elapsed < Duration::from_millis(1150), "took {:?}", elapsed);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(10), MAX_BACKOFF);
    }
}
