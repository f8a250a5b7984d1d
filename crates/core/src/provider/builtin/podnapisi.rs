//! Podnapisi.NET provider (JSON search endpoint, zipped downloads).

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    extract_subtitle, Candidate, Credentials, DownloadHandle, LazyClient, Provider,
    ProviderError, ProviderInfo, Query, RateLimitPolicy,
};

const DEFAULT_BASE_URL: &str = "https://www.podnapisi.net";

pub struct PodnapisiProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
}

impl PodnapisiProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("podnapisi");
        info.languages = super::all_language_codes();
        info.rate_limit = RateLimitPolicy::new(20, 10);
        info.timeout_secs = 20;
        info.default_priority = 30;
        info
    }

    pub fn new(info: ProviderInfo, _credentials: &Credentials) -> Self {
        Self {
            client: LazyClient::new(info.timeout()),
            info,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn search_params(query: &Query) -> Vec<(&'static str, String)> {
    let mut params = vec![("keywords", query.title.clone())];
    if let Some(year) = query.year {
        params.push(("year", year.to_string()));
    }
    if let (Some(season), Some(episode)) = (query.season, query.episode) {
        params.push(("seasons", season.to_string()));
        params.push(("episodes", episode.to_string()));
        params.push(("movie_type", "tv-series".to_string()));
    }
    for language in &query.languages {
        params.push(("language", language.clone()));
    }
    params
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<PodnapisiSubtitle>,
}

#[derive(Debug, Deserialize)]
struct PodnapisiSubtitle {
    id: String,
    language: String,
    #[serde(default)]
    releases: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    movie: Option<Movie>,
    episode_info: Option<EpisodeInfo>,
    download: Option<String>,
    stats: Option<Stats>,
}

#[derive(Debug, Deserialize)]
struct Movie {
    title: Option<String>,
    year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EpisodeInfo {
    season: Option<u32>,
    episode: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Stats {
    downloads: Option<u64>,
}

fn parse_search(provider: &str, body: SearchResponse) -> Vec<Candidate> {
    body.data
        .into_iter()
        .map(|sub| {
            let release = sub.releases.first().cloned().unwrap_or_else(|| {
                sub.movie
                    .as_ref()
                    .and_then(|m| m.title.clone())
                    .unwrap_or_default()
            });
            let link = sub
                .download
                .clone()
                .unwrap_or_else(|| format!("/subtitles/{}/download", sub.id));
            let mut candidate =
                Candidate::new(provider, sub.id, sub.language, release, DownloadHandle::Url(link));
            candidate.hearing_impaired = sub.flags.iter().any(|f| f == "hearing_impaired");
            candidate.foreign_parts_only = sub.flags.iter().any(|f| f == "foreign_only");
            candidate.downloads = sub.stats.and_then(|s| s.downloads);
            if let Some(movie) = sub.movie {
                candidate.title = movie.title;
                candidate.year = movie.year;
            }
            if let Some(episode) = sub.episode_info {
                candidate.season = episode.season;
                candidate.episode = episode.episode;
            }
            if sub.releases.len() > 1 {
                candidate
                    .extra
                    .insert("releases".to_string(), sub.releases.join(" | "));
            }
            candidate.enrich_from_release_name()
        })
        .collect()
}

#[async_trait]
impl Provider for PodnapisiProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let client = self.client.get().await?;
        let request = client
            .get(format!("{}/subtitles/search/old", self.base_url))
            .header("Accept", "application/json")
            .query(&search_params(query));
        let body: SearchResponse = send_json(request, self.client.timeout()).await?;
        Ok(parse_search(&self.info.name, body))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let url = format!("{}{}", self.base_url, candidate.download.as_str());
        let bytes = send_bytes(client.get(&url), self.client.timeout()).await?;
        extract_subtitle(bytes, None)
    }
}
