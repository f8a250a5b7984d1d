//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Provider calls (outcomes, latency, retries)
//! - Reliability (circuit transitions, auto-disables)
//! - Search (duration, result counts, cache lookups)
//! - Plugins (reloads, loaded count)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Provider Calls
// =============================================================================

/// Provider calls by outcome.
pub static PROVIDER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_provider_calls_total", "Total provider calls"),
        &["provider", "operation", "outcome"], // outcome: "success", "failed", "rate_limited", "timed_out"
    )
    .unwrap()
});

/// Provider call duration in seconds, including retries.
pub static PROVIDER_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "subfetch_provider_call_duration_seconds",
            "Duration of provider calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["provider", "operation"],
    )
    .unwrap()
});

/// Retries issued after a retryable provider error.
pub static PROVIDER_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_provider_retries_total", "Total provider call retries"),
        &["provider"],
    )
    .unwrap()
});

// =============================================================================
// Reliability
// =============================================================================

/// Circuit breaker state transitions.
pub static CIRCUIT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "subfetch_circuit_transitions_total",
            "Circuit breaker state transitions",
        ),
        &["provider", "state"], // state entered: "closed", "open", "half_open"
    )
    .unwrap()
});

/// Providers auto-disabled after sustained failures.
pub static AUTO_DISABLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_auto_disables_total", "Provider auto-disable events"),
        &["provider"],
    )
    .unwrap()
});

// =============================================================================
// Search
// =============================================================================

/// Search duration in seconds.
pub static SEARCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("subfetch_search_duration_seconds", "Duration of searches")
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
        &["source"], // "providers", "cache"
    )
    .unwrap()
});

/// Ranked results returned per search.
pub static SEARCH_RESULTS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("subfetch_search_results", "Number of results per search")
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        &[],
    )
    .unwrap()
});

/// Result cache lookups by result.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_cache_lookups_total", "Result cache lookups"),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

// =============================================================================
// Plugins
// =============================================================================

/// Plugin reloads by result.
pub static PLUGIN_RELOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_plugin_reloads_total", "Plugin directory reloads"),
        &["result"], // "ok", "partial", "failed"
    )
    .unwrap()
});

/// Plugin providers currently registered.
pub static PLUGINS_LOADED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("subfetch_plugins_loaded", "Plugin providers currently registered").unwrap()
});

/// All core metrics, for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Provider calls
        Box::new(PROVIDER_CALLS.clone()),
        Box::new(PROVIDER_CALL_DURATION.clone()),
        Box::new(PROVIDER_RETRIES.clone()),
        // Reliability
        Box::new(CIRCUIT_TRANSITIONS.clone()),
        Box::new(AUTO_DISABLES.clone()),
        // Search
        Box::new(SEARCH_DURATION.clone()),
        Box::new(SEARCH_RESULTS.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        // Plugins
        Box::new(PLUGIN_RELOADS.clone()),
        Box::new(PLUGINS_LOADED.clone()),
    ]
}
