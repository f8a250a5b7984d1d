use std::sync::Arc;

use axum::{extract::State, Json};
use subfetch_core::ReloadReport;

use super::ApiError;
use crate::state::AppState;

/// POST /api/v1/plugins/reload
///
/// Re-scan the plugin directory and swap in the new plugin set.
pub async fn reload_plugins(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadReport>, ApiError> {
    Ok(Json(state.engine().reload_plugins().await?))
}
