//! BetaSeries provider: French and original-language subtitles for TV shows.

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    extract_subtitle, Candidate, ConfigField, Credentials, DownloadHandle, FieldType, LazyClient,
    Provider, ProviderError, ProviderInfo, Query, RateLimitPolicy,
};

const DEFAULT_BASE_URL: &str = "https://api.betaseries.com";
const API_VERSION: &str = "3.0";

pub struct BetaSeriesProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
    api_key: Option<String>,
}

impl BetaSeriesProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("betaseries");
        info.languages = vec!["fr".to_string(), "en".to_string()];
        info.config_fields = vec![ConfigField::new("api_key", "API key", FieldType::Secret, true)];
        info.rate_limit = RateLimitPolicy::new(20, 10);
        info.timeout_secs = 20;
        info.default_priority = 60;
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

    fn get(&self, client: &reqwest::Client, path: &str, api_key: &str) -> reqwest::RequestBuilder {
        client
            .get(format!("{}{}", self.base_url, path))
            .header("X-BetaSeries-Key", api_key)
            .header("X-BetaSeries-Version", API_VERSION)
    }
}

#[derive(Debug, Deserialize)]
struct ShowsResponse {
    #[serde(default)]
    shows: Vec<Show>,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    show: Show,
}

#[derive(Debug, Deserialize)]
struct Show {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct EpisodeResponse {
    episode: EpisodeRef,
}

#[derive(Debug, Deserialize)]
struct EpisodeRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct SubtitlesResponse {
    #[serde(default)]
    subtitles: Vec<BetaSubtitle>,
}

#[derive(Debug, Deserialize)]
struct BetaSubtitle {
    id: u64,
    /// "VF" (French) or "VO" (original, English).
    language: String,
    source: Option<String>,
    file: String,
    url: String,
    quality: Option<u32>,
}

fn language_of(tag: &str) -> Option<&'static str> {
    match tag.to_ascii_uppercase().as_str() {
        "VF" | "FR" => Some("fr"),
        "VO" | "EN" | "VOVF" => Some("en"),
        _ => None,
    }
}

fn episode_number(season: u32, episode: u32) -> String {
    format!("S{:02}E{:02}", season, episode)
}

fn parse_subtitles(
    provider: &str,
    show: &str,
    season: u32,
    episode: u32,
    body: SubtitlesResponse,
) -> Vec<Candidate> {
    body.subtitles
        .into_iter()
        .filter_map(|sub| {
            let language = language_of(&sub.language)?;
            let mut candidate = Candidate::new(
                provider,
                sub.id.to_string(),
                language,
                sub.file,
                DownloadHandle::Url(sub.url),
            )
            .enrich_from_release_name();
            candidate.title = Some(show.to_string());
            candidate.season = Some(season);
            candidate.episode = Some(episode);
            // Quality is a 1-5 community rating; 4+ counts as vetted.
            candidate.uploader_trusted = sub.quality.unwrap_or(0) >= 4;
            if let Some(source) = sub.source {
                candidate.extra.insert("source".to_string(), source);
            }
            Some(candidate)
        })
        .collect()
}

#[async_trait]
impl Provider for BetaSeriesProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let (Some(season), Some(episode)) = (query.season, query.episode) else {
            return Ok(Vec::new());
        };
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("betaseries api_key".to_string()))?;
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let show = match &query.imdb_id {
            Some(imdb) => {
                let request = self
                    .get(client, "/shows/display", api_key)
                    .query(&[("imdb_id", imdb.as_str())]);
                send_json::<ShowResponse>(request, timeout).await?.show
            }
            None => {
                let request = self
                    .get(client, "/shows/search", api_key)
                    .query(&[("title", query.title.as_str())]);
                let shows: ShowsResponse = send_json(request, timeout).await?;
                match shows.shows.into_iter().next() {
                    Some(show) => show,
                    None => return Ok(Vec::new()),
                }
            }
        };

        let request = self
            .get(client, "/episodes/search", api_key)
            .query(&[
                ("show_id", show.id.to_string()),
                ("number", episode_number(season, episode)),
            ]);
        let found = match send_json::<EpisodeResponse>(request, timeout).await {
            Ok(found) => found,
            Err(ProviderError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let request = self
            .get(client, "/subtitles/episode", api_key)
            .query(&[("id", found.episode.id.to_string())]);
        let body: SubtitlesResponse = send_json(request, timeout).await?;
        Ok(parse_subtitles(&self.info.name, &show.title, season, episode, body))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let bytes = send_bytes(client.get(candidate.download.as_str()), self.client.timeout()).await?;
        extract_subtitle(bytes, Some(candidate.format))
    }
}
