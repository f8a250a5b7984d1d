use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, middleware::metrics_middleware, plugins, providers, search};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Search
        .route("/search", post(search::search))
        .route("/download", post(search::download))
        // Providers
        .route("/providers", get(providers::list_providers))
        .route("/providers/{name}", get(providers::get_provider))
        .route("/providers/{name}/enable", post(providers::enable_provider))
        .route("/providers/{name}/disable", post(providers::disable_provider))
        .route("/providers/{name}/priority", put(providers::set_priority))
        .route("/providers/{name}/score-modifier", put(providers::set_score_modifier))
        .route("/providers/{name}/reenable", post(providers::reenable_provider))
        .route("/providers/{name}/test", post(providers::test_provider))
        // Scoring
        .route("/scoring/weights", get(providers::get_weights))
        .route("/scoring/weights/{key}", put(providers::set_weight))
        // Plugins
        .route("/plugins/reload", post(plugins::reload_plugins));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
