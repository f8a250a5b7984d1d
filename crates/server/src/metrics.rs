//! Prometheus metrics for the HTTP shell.
//!
//! Registers the server's HTTP metrics alongside the engine collectors from
//! `subfetch_core::metrics`, plus provider gauges refreshed on every scrape.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::error;

use subfetch_core::provider::ProviderOrigin;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "subfetch_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("subfetch_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "subfetch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Provider Gauges (collected on scrape)
// =============================================================================

/// Registered providers by origin.
pub static PROVIDERS_REGISTERED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("subfetch_providers_registered", "Registered providers by origin"),
        &["origin"],
    )
    .unwrap()
});

/// Providers that a search would currently dispatch to.
pub static PROVIDERS_DISPATCHABLE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "subfetch_providers_dispatchable",
        "Providers currently eligible for dispatch",
    )
    .unwrap()
});

/// Providers currently auto-disabled.
pub static PROVIDERS_AUTO_DISABLED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "subfetch_providers_auto_disabled",
        "Providers currently auto-disabled",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Providers
    registry
        .register(Box::new(PROVIDERS_REGISTERED.clone()))
        .unwrap();
    registry
        .register(Box::new(PROVIDERS_DISPATCHABLE.clone()))
        .unwrap();
    registry
        .register(Box::new(PROVIDERS_AUTO_DISABLED.clone()))
        .unwrap();

    // Engine metrics (provider calls, breakers, cache, plugins)
    for metric in subfetch_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh provider gauges from the engine's current view.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let statuses = state.engine().list_providers().await;

    let mut builtin = 0;
    let mut plugin = 0;
    let mut dispatchable = 0;
    let mut auto_disabled = 0;
    for status in &statuses {
        match status.descriptor.origin {
            ProviderOrigin::Builtin => builtin += 1,
            ProviderOrigin::Plugin => plugin += 1,
        }
        if status.dispatchable {
            dispatchable += 1;
        }
        if status.health.as_ref().is_some_and(|h| h.auto_disabled) {
            auto_disabled += 1;
        }
    }

    PROVIDERS_REGISTERED.with_label_values(&["builtin"]).set(builtin);
    PROVIDERS_REGISTERED.with_label_values(&["plugin"]).set(plugin);
    PROVIDERS_DISPATCHABLE.set(dispatchable);
    PROVIDERS_AUTO_DISABLED.set(auto_disabled);
}

static PROVIDER_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/providers/[^/]+").unwrap());
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace names and IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = PROVIDER_SEGMENT.replace_all(path, "/providers/{name}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
