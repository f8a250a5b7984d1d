//! Search and download handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use subfetch_core::{Query, ScoredResult, SearchResponse, SubtitleFormat};
use tracing::info;

use super::ApiError;
use crate::state::AppState;

/// POST /api/v1/search
///
/// Fan the query out to every eligible provider and return ranked results
/// with per-provider diagnostics. Provider failures never fail the request.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(query): Json<Query>,
) -> Result<Json<SearchResponse>, ApiError> {
    let has_identifier = query.imdb_id.is_some()
        || query.tmdb_id.is_some()
        || query.anilist_id.is_some()
        || query.file_hash.is_some();
    if query.title.trim().is_empty() && !has_identifier {
        return Err(ApiError::bad_request(
            "query needs a title, an external id, or a file hash",
        ));
    }

    let response = state.engine().search(&query).await;
    Ok(Json(response))
}

/// POST /api/v1/download
///
/// Fetch the subtitle bytes of a result previously returned by a search.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Json(result): Json<ScoredResult>,
) -> Result<Response, ApiError> {
    let bytes = state.engine().download(&result).await?;
    let candidate = &result.candidate;
    info!(
        provider = %candidate.provider,
        id = %candidate.id,
        bytes = bytes.len(),
        "Served subtitle download"
    );

    let filename = attachment_name(&candidate.release_name, candidate.format);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type(candidate.format))),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn content_type(format: SubtitleFormat) -> &'static str {
    match format {
        SubtitleFormat::Srt => "application/x-subrip",
        SubtitleFormat::Vtt => "text/vtt",
        SubtitleFormat::Ass | SubtitleFormat::Ssa => "text/x-ssa",
        SubtitleFormat::Sub | SubtitleFormat::Other => "application/octet-stream",
    }
}

/// Release name reduced to a header-safe file name with the format's extension.
fn attachment_name(release_name: &str, format: SubtitleFormat) -> String {
    let ext = format.extension();
    let stem = release_name
        .strip_suffix(&format!(".{}", ext))
        .unwrap_or(release_name);
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() { "subtitle".to_string() } else { stem };
    format!("{}.{}", stem, ext)
}
