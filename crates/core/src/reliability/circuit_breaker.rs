//! Per-provider circuit breaker.
//!
//! CLOSED allows dispatch. N consecutive failures open the circuit. Once the
//! cooldown elapses the breaker is HALF_OPEN and admits exactly one trial
//! call; its outcome closes the circuit or re-opens it with a fresh cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::metrics;

/// Breaker thresholds for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker, for the management surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitStatus,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    /// Milliseconds since the current state was entered.
    pub in_state_ms: u64,
    /// Milliseconds until an open circuit admits a trial call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    entered_at: Instant,
    trial_in_flight: bool,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            entered_at: Instant::now(),
            trial_in_flight: false,
        }
    }

    fn enter(&mut self, status: CircuitStatus) {
        self.status = status;
        self.entered_at = Instant::now();
        self.trial_in_flight = false;
    }
}

/// Circuit breaker guarding a single provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    policy: BreakerPolicy,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            provider: provider.into(),
            policy,
            state: Mutex::new(CircuitState::new()),
        }
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        // A panic while holding this lock cannot leave the state half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown_elapsed(&self, state: &CircuitState) -> bool {
        state.entered_at.elapsed() >= self.policy.cooldown
    }

    fn transition(&self, state: &mut CircuitState, to: CircuitStatus) {
        if state.status == to {
            return;
        }
        let from = state.status;
        state.enter(to);
        metrics::CIRCUIT_TRANSITIONS
            .with_label_values(&[self.provider.as_str(), to.as_str()])
            .inc();
        match to {
            CircuitStatus::Open => warn!(
                provider = %self.provider,
                from = from.as_str(),
                failures = state.consecutive_failures,
                "Circuit opened"
            ),
            _ => info!(
                provider = %self.provider,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
    }

    /// Current state, with OPEN reported as HALF_OPEN once the cooldown elapsed.
    pub fn status(&self) -> CircuitStatus {
        let state = self.lock();
        match state.status {
            CircuitStatus::Open if self.cooldown_elapsed(&state) => CircuitStatus::HalfOpen,
            status => status,
        }
    }

    /// Whether dispatch is currently blocked.
    ///
    /// A HALF_OPEN breaker whose trial is already running counts as blocked.
    pub fn is_blocking(&self) -> bool {
        let state = self.lock();
        match state.status {
            CircuitStatus::Closed => false,
            CircuitStatus::Open => !self.cooldown_elapsed(&state),
            CircuitStatus::HalfOpen => state.trial_in_flight,
        }
    }

    /// Claim permission to dispatch one call.
    ///
    /// Returns false when the circuit is open, or half-open with the single
    /// trial already claimed.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                if !self.cooldown_elapsed(&state) {
                    return false;
                }
                self.transition(&mut state, CircuitStatus::HalfOpen);
                state.trial_in_flight = true;
                true
            }
            CircuitStatus::HalfOpen => {
                if state.trial_in_flight {
                    false
                } else {
                    state.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        match state.status {
            CircuitStatus::Closed => {}
            // A late success from a call dispatched before the circuit opened
            // does not close it; only the trial decides.
            CircuitStatus::Open => {}
            CircuitStatus::HalfOpen => self.transition(&mut state, CircuitStatus::Closed),
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        match state.status {
            CircuitStatus::Closed => {
                if state.consecutive_failures >= self.policy.failure_threshold {
                    self.transition(&mut state, CircuitStatus::Open);
                }
            }
            CircuitStatus::Open => {}
            CircuitStatus::HalfOpen => self.transition(&mut state, CircuitStatus::Open),
        }
    }

    /// Release a claimed call whose outcome says nothing about provider health
    /// (throttled or cancelled).
    pub fn record_neutral(&self) {
        let mut state = self.lock();
        if state.status == CircuitStatus::HalfOpen {
            state.trial_in_flight = false;
        }
    }

    /// Force the breaker back to CLOSED with a zeroed counter.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        self.transition(&mut state, CircuitStatus::Closed);
        state.trial_in_flight = false;
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        let in_state = state.entered_at.elapsed();
        let (status, retry_in_ms) = match state.status {
            CircuitStatus::Open if in_state >= self.policy.cooldown => {
                (CircuitStatus::HalfOpen, None)
            }
            CircuitStatus::Open => (
                CircuitStatus::Open,
                Some((self.policy.cooldown - in_state).as_millis() as u64),
            ),
            status => (status, None),
        };
        CircuitSnapshot {
            state: status,
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.policy.failure_threshold,
            in_state_ms: in_state.as_millis() as u64,
            retry_in_ms,
        }
    }
}

/// All breakers, one per provider name.
///
/// Each breaker has its own lock; the map lock is only held to look one up.
#[derive(Debug)]
pub struct CircuitBreakers {
    default_policy: BreakerPolicy,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(default_policy: BreakerPolicy) -> Self {
        Self {
            default_policy,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_policy(&self) -> BreakerPolicy {
        self.default_policy
    }

    /// Install a breaker with a specific policy, replacing any existing one
    /// whose policy differs.
    pub fn configure(&self, provider: &str, policy: BreakerPolicy) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = breakers.get(provider) {
            if existing.policy() == policy {
                return existing.clone();
            }
        }
        let breaker = Arc::new(CircuitBreaker::new(provider, policy));
        breakers.insert(provider.to_string(), breaker.clone());
        breaker
    }

    /// Breaker for a provider, created with the default policy on first use.
    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(provider) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.default_policy)))
            .clone()
    }

    pub fn remove(&self, provider: &str) {
        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers.remove(provider);
    }
}
