//! SubDL provider.
//!
//! Search needs an API key; downloads are zip archives served from a
//! separate download host.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::language_code;
use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    extract_subtitle, Candidate, ConfigField, Credentials, DownloadHandle, FieldType, LazyClient,
    Provider, ProviderError, ProviderInfo, Query, RateLimitPolicy,
};

const DEFAULT_BASE_URL: &str = "https://api.subdl.com/api/v1";
const DEFAULT_DOWNLOAD_URL: &str = "https://dl.subdl.com";

pub struct SubdlProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
    download_url: String,
    api_key: Option<String>,
}

impl SubdlProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("subdl");
        info.config_fields = vec![ConfigField::new("api_key", "API key", FieldType::Secret, true)];
        info.rate_limit = RateLimitPolicy::new(30, 60);
        info.timeout_secs = 20;
        info.default_priority = 20;
        info
    }

    pub fn new(info: ProviderInfo, credentials: &Credentials) -> Self {
        Self {
            client: LazyClient::new(info.timeout()),
            info,
            base_url: DEFAULT_BASE_URL.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            api_key: credentials.get("api_key").map(str::to_string),
        }
    }

    pub fn with_base_urls(mut self, api: impl Into<String>, download: impl Into<String>) -> Self {
        self.base_url = api.into();
        self.download_url = download.into();
        self
    }
}

fn search_params(api_key: &str, query: &Query) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("api_key", api_key.to_string()),
        ("subs_per_page", "30".to_string()),
    ];
    match (&query.imdb_id, query.tmdb_id) {
        (Some(imdb), _) => params.push(("imdb_id", imdb.clone())),
        (None, Some(tmdb)) => params.push(("tmdb_id", tmdb.to_string())),
        (None, None) => params.push(("film_name", query.title.clone())),
    }
    params.push(("type", if query.is_episode() { "tv" } else { "movie" }.to_string()));
    if let Some(season) = query.season {
        params.push(("season_number", season.to_string()));
    }
    if let Some(episode) = query.episode {
        params.push(("episode_number", episode.to_string()));
    }
    if let Some(year) = query.year {
        params.push(("year", year.to_string()));
    }
    if !query.languages.is_empty() {
        let langs = query
            .languages
            .iter()
            .map(|l| l.to_uppercase())
            .collect::<Vec<_>>()
            .join(",");
        params.push(("languages", langs));
    }
    params
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    subtitles: Vec<SubdlSubtitle>,
}

#[derive(Debug, Deserialize)]
struct SubdlSubtitle {
    release_name: String,
    /// Language code, e.g. "EN".
    language: Option<String>,
    /// Language name, e.g. "english".
    lang: Option<String>,
    url: String,
    season: Option<u32>,
    episode: Option<u32>,
    #[serde(default)]
    hi: bool,
    author: Option<String>,
}

fn parse_search(provider: &str, body: SearchResponse) -> Result<Vec<Candidate>, ProviderError> {
    if !body.status {
        let message = body.error.unwrap_or_default();
        let lowered = message.to_lowercase();
        if lowered.contains("api key") || lowered.contains("api_key") {
            return Err(ProviderError::Auth(message));
        }
        // "can't find movie or tv" and friends mean no results.
        debug!(provider = %provider, message = %message, "No results");
        return Ok(Vec::new());
    }

    Ok(body
        .subtitles
        .into_iter()
        .map(|sub| {
            let language = sub
                .language
                .as_deref()
                .and_then(language_code)
                .or_else(|| sub.lang.as_deref().and_then(language_code))
                .unwrap_or("en");
            let mut candidate = Candidate::new(
                provider,
                sub.url.clone(),
                language,
                sub.release_name,
                DownloadHandle::Url(sub.url),
            );
            candidate.season = sub.season;
            candidate.episode = sub.episode.filter(|e| *e > 0);
            candidate.hearing_impaired = sub.hi;
            if let Some(author) = sub.author {
                candidate.extra.insert("author".to_string(), author);
            }
            candidate.enrich_from_release_name()
        })
        .collect())
}

#[async_trait]
impl Provider for SubdlProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("subdl api_key".to_string()))?;
        let client = self.client.get().await?;
        let request = client
            .get(format!("{}/subtitles", self.base_url))
            .query(&search_params(api_key, query));
        let body: SearchResponse = send_json(request, self.client.timeout()).await?;
        parse_search(&self.info.name, body)
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let url = format!("{}{}", self.download_url, candidate.download.as_str());
        let bytes = send_bytes(client.get(&url), self.client.timeout()).await?;
        extract_subtitle(bytes, None)
    }
}
