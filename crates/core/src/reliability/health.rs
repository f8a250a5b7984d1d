//! Provider health statistics and auto-disable.
//!
//! Independent of the circuit breaker: the breaker reacts to short bursts of
//! failures, auto-disable to sustained outages. Records are written through to
//! a [`HealthStore`] on every update so a disabled provider stays disabled
//! across restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics;
use crate::provider::{ErrorKind, ProviderError};
use crate::store::{HealthStore, StoreError};

/// Auto-disable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Auto-disable after `multiplier * breaker threshold` consecutive failures.
    pub auto_disable_multiplier: u32,
    /// How long an auto-disabled provider stays out of dispatch.
    pub auto_disable_cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            auto_disable_multiplier: 2,
            auto_disable_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

impl HealthPolicy {
    pub fn disable_threshold(&self, breaker_threshold: u32) -> u32 {
        breaker_threshold
            .saturating_mul(self.auto_disable_multiplier)
            .max(1)
    }
}

/// Accumulated health of one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub provider: String,
    pub total_searches: u64,
    pub successes: u64,
    pub failures: u64,
    /// Running mean over every recorded call.
    pub avg_response_ms: f64,
    pub last_response_ms: u64,
    pub consecutive_failures: u32,
    pub auto_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl HealthRecord {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            total_searches: 0,
            successes: 0,
            failures: 0,
            avg_response_ms: 0.0,
            last_response_ms: 0,
            consecutive_failures: 0,
            auto_disabled: false,
            disabled_until: None,
            last_error: None,
            last_error_kind: None,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    /// Fraction of recorded calls that succeeded, 1.0 when nothing is recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_searches == 0 {
            1.0
        } else {
            self.successes as f64 / self.total_searches as f64
        }
    }

    /// Whether the provider is excluded from dispatch at `now`.
    pub fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        self.auto_disabled && self.disabled_until.map_or(true, |until| now < until)
    }

    fn observe_latency(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.total_searches += 1;
        let n = self.total_searches as f64;
        self.avg_response_ms = (self.avg_response_ms * (n - 1.0) + ms as f64) / n;
        self.last_response_ms = ms;
    }

    fn clear_auto_disable(&mut self) {
        self.auto_disabled = false;
        self.disabled_until = None;
        self.consecutive_failures = 0;
    }
}

/// Tracks a [`HealthRecord`] per provider.
///
/// Each record has its own lock so updates for different providers never
/// contend.
pub struct HealthMonitor {
    policy: HealthPolicy,
    store: Arc<dyn HealthStore>,
    records: RwLock<HashMap<String, Arc<Mutex<HealthRecord>>>>,
}

fn lock(record: &Mutex<HealthRecord>) -> MutexGuard<'_, HealthRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

impl HealthMonitor {
    /// Create a monitor, restoring every record the store holds.
    pub fn load(policy: HealthPolicy, store: Arc<dyn HealthStore>) -> Result<Self, StoreError> {
        let records = store
            .load_all()?
            .into_iter()
            .map(|r| (r.provider.clone(), Arc::new(Mutex::new(r))))
            .collect::<HashMap<_, _>>();
        if !records.is_empty() {
            info!(count = records.len(), "Restored provider health records");
        }
        Ok(Self {
            policy,
            store,
            records: RwLock::new(records),
        })
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    fn entry(&self, provider: &str) -> Arc<Mutex<HealthRecord>> {
        {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = records.get(provider) {
                return record.clone();
            }
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HealthRecord::new(provider))))
            .clone()
    }

    fn persist(&self, record: &HealthRecord) {
        if let Err(e) = self.store.save(record) {
            warn!(provider = %record.provider, error = %e, "Failed to persist health record");
        }
    }

    pub fn record_success(&self, provider: &str, elapsed: Duration, now: DateTime<Utc>) {
        let entry = self.entry(provider);
        let mut record = lock(&entry);
        record.observe_latency(elapsed);
        record.successes += 1;
        record.consecutive_failures = 0;
        record.last_success_at = Some(now);
        self.persist(&record);
    }

    /// Record a failed call.
    ///
    /// Returns true when this failure auto-disabled the provider, which
    /// happens exactly when the consecutive-failure count reaches
    /// `policy.disable_threshold(breaker_threshold)`.
    pub fn record_failure(
        &self,
        provider: &str,
        elapsed: Duration,
        error: &ProviderError,
        breaker_threshold: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let entry = self.entry(provider);
        let mut record = lock(&entry);
        record.observe_latency(elapsed);
        record.failures += 1;
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_error = Some(error.to_string());
        record.last_error_kind = Some(error.kind());
        record.last_failure_at = Some(now);

        let threshold = self.policy.disable_threshold(breaker_threshold);
        let disabled_now = !record.auto_disabled && record.consecutive_failures >= threshold;
        if disabled_now {
            let cooldown = chrono::Duration::from_std(self.policy.auto_disable_cooldown)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
            let until = now.checked_add_signed(cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.auto_disabled = true;
            record.disabled_until = Some(until);
            metrics::AUTO_DISABLES.with_label_values(&[provider]).inc();
            warn!(
                provider = %provider,
                consecutive_failures = record.consecutive_failures,
                until = %until,
                "Provider auto-disabled after sustained failures"
            );
        }
        self.persist(&record);
        disabled_now
    }

    /// Whether `provider` is auto-disabled at `now`.
    ///
    /// An expired auto-disable is cleared (and persisted) here, giving the
    /// provider a fresh failure budget.
    pub fn is_auto_disabled(&self, provider: &str, now: DateTime<Utc>) -> bool {
        let entry = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            match records.get(provider) {
                Some(entry) => entry.clone(),
                None => return false,
            }
        };
        let mut record = lock(&entry);
        if !record.auto_disabled {
            return false;
        }
        if record.is_disabled_at(now) {
            return true;
        }
        info!(provider = %provider, "Auto-disable cooldown elapsed, provider re-admitted");
        record.clear_auto_disable();
        self.persist(&record);
        false
    }

    /// Manual re-enable: clears auto-disable and the consecutive-failure counter.
    pub fn reenable(&self, provider: &str) -> HealthRecord {
        let entry = self.entry(provider);
        let mut record = lock(&entry);
        record.clear_auto_disable();
        self.persist(&record);
        info!(provider = %provider, "Provider manually re-enabled");
        record.clone()
    }

    pub fn get(&self, provider: &str) -> Option<HealthRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(provider).map(|r| lock(r).clone())
    }

    /// Snapshot of every record, sorted by provider name.
    pub fn all(&self) -> Vec<HealthRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<HealthRecord> = records.values().map(|r| lock(r).clone()).collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }
}
