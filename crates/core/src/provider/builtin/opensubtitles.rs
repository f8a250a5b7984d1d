//! OpenSubtitles.com REST API provider.
//!
//! Requires an API key. Supports movie-hash search, so results synced
//! against the caller's exact file are reported with that hash.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    Candidate, ConfigField, Credentials, DownloadHandle, FieldType, LazyClient, Provider,
    ProviderError, ProviderInfo, Query, RateLimitPolicy,
};

const DEFAULT_BASE_URL: &str = "https://api.opensubtitles.com/api/v1";

pub struct OpenSubtitlesProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
    api_key: Option<String>,
}

impl OpenSubtitlesProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("opensubtitles");
        info.config_fields = vec![ConfigField::new("api_key", "API key", FieldType::Secret, true)];
        info.rate_limit = RateLimitPolicy::new(40, 10);
        info.timeout_secs = 15;
        info.default_priority = 10;
        info
    }

    pub fn new(info: ProviderInfo, credentials: &Credentials) -> Self {
        Self {
            client: LazyClient::new(info.timeout()),
            info,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: credentials.get("api_key").map(str::to_string),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("opensubtitles api_key".to_string()))
    }
}

/// Query-string parameters for `/subtitles`.
fn search_params(query: &Query) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    match (&query.imdb_id, query.tmdb_id) {
        (Some(imdb), _) => params.push(("imdb_id", imdb.trim_start_matches("tt").to_string())),
        (None, Some(tmdb)) => params.push(("tmdb_id", tmdb.to_string())),
        (None, None) => params.push(("query", query.title.to_lowercase())),
    }
    if !query.languages.is_empty() {
        params.push((
            "languages",
            query.languages.iter().cloned().collect::<Vec<_>>().join(","),
        ));
    }
    if let Some(hash) = &query.file_hash {
        params.push(("moviehash", hash.to_lowercase()));
    }
    if let Some(season) = query.season {
        params.push(("season_number", season.to_string()));
    }
    if let Some(episode) = query.episode {
        params.push(("episode_number", episode.to_string()));
    }
    if let Some(year) = query.year {
        params.push(("year", year.to_string()));
    }
    // The API redirects unsorted parameter lists.
    params.sort_by(|a, b| a.0.cmp(b.0));
    params
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SubtitleItem>,
}

#[derive(Debug, Deserialize)]
struct SubtitleItem {
    id: String,
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
struct Attributes {
    language: Option<String>,
    release: Option<String>,
    #[serde(default)]
    hearing_impaired: bool,
    #[serde(default)]
    foreign_parts_only: bool,
    #[serde(default)]
    from_trusted: bool,
    download_count: Option<u64>,
    #[serde(default)]
    moviehash_match: bool,
    feature_details: Option<FeatureDetails>,
    #[serde(default)]
    files: Vec<SubtitleFile>,
}

#[derive(Debug, Deserialize)]
struct FeatureDetails {
    title: Option<String>,
    parent_title: Option<String>,
    year: Option<u32>,
    season_number: Option<u32>,
    episode_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SubtitleFile {
    file_id: u64,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: String,
}

fn parse_search(provider: &str, query: &Query, body: SearchResponse) -> Vec<Candidate> {
    body.data
        .into_iter()
        .filter_map(|item| {
            let attrs = item.attributes;
            let file = attrs.files.first()?;
            let release = attrs
                .release
                .clone()
                .or_else(|| file.file_name.clone())
                .unwrap_or_default();
            let mut candidate = Candidate::new(
                provider,
                item.id,
                attrs.language.as_deref().unwrap_or("en"),
                release,
                DownloadHandle::Token(file.file_id.to_string()),
            );
            // The API serves every file as SRT.
            candidate.format = crate::provider::SubtitleFormat::Srt;
            candidate.hearing_impaired = attrs.hearing_impaired;
            candidate.foreign_parts_only = attrs.foreign_parts_only;
            candidate.uploader_trusted = attrs.from_trusted;
            candidate.downloads = attrs.download_count;
            if attrs.moviehash_match {
                candidate.file_hash = query.file_hash.clone();
            }
            if let Some(details) = attrs.feature_details {
                candidate.title = details.parent_title.or(details.title);
                candidate.year = details.year;
                candidate.season = details.season_number;
                candidate.episode = details.episode_number;
            }
            Some(candidate.enrich_from_release_name())
        })
        .collect()
}

#[async_trait]
impl Provider for OpenSubtitlesProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let api_key = self.api_key()?;
        let client = self.client.get().await?;
        let url = format!("{}/subtitles", self.base_url);
        let params = search_params(query);
        debug!(provider = %self.info.name, params = ?params, "Searching");

        let request = client
            .get(&url)
            .header("Api-Key", api_key)
            .query(&params);
        let body: SearchResponse = send_json(request, self.client.timeout()).await?;
        Ok(parse_search(&self.info.name, query, body))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let api_key = self.api_key()?;
        let client = self.client.get().await?;
        let file_id: u64 = candidate
            .download
            .as_str()
            .parse()
            .map_err(|_| ProviderError::Rejected(format!("Invalid file id: {}", candidate.download.as_str())))?;

        let request = client
            .post(format!("{}/download", self.base_url))
            .header("Api-Key", api_key)
            .json(&serde_json::json!({ "file_id": file_id }));
        let link: DownloadResponse = send_json(request, self.client.timeout()).await?;
        send_bytes(client.get(&link.link), self.client.timeout()).await
    }
}
