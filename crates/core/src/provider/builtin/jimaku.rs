//! Jimaku provider: Japanese subtitles for anime.
//!
//! Search resolves an entry (by AniList id when known), then lists the
//! entry's files for the requested episode.

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::http::{send_bytes, send_json};
use crate::provider::release::parse_release_name;
use crate::provider::{
    extract_subtitle, Candidate, ConfigField, Credentials, DownloadHandle, FieldType, LazyClient,
    Provider, ProviderError, ProviderInfo, Query, RateLimitPolicy, SubtitleFormat,
};

const DEFAULT_BASE_URL: &str = "https://jimaku.cc/api";

pub struct JimakuProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
    api_key: Option<String>,
}

impl JimakuProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("jimaku");
        info.languages = vec!["ja".to_string()];
        info.config_fields = vec![ConfigField::new("api_key", "API key", FieldType::Secret, true)];
        info.rate_limit = RateLimitPolicy::new(25, 60);
        info.timeout_secs = 20;
        info.default_priority = 70;
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
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: u64,
    name: String,
    anilist_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EntryFile {
    url: String,
    name: String,
    size: Option<u64>,
}

fn entry_params(query: &Query) -> Vec<(&'static str, String)> {
    let mut params = vec![("anime", "true".to_string())];
    match query.anilist_id {
        Some(id) => params.push(("anilist_id", id.to_string())),
        None => params.push(("query", query.title.clone())),
    }
    params
}

/// Files named for another episode are dropped; archives and unnumbered
/// files are kept because they may hold the requested one.
fn file_matches_episode(name: &str, episode: Option<u32>) -> bool {
    match (episode, parse_release_name(name).episode) {
        (Some(wanted), Some(found)) => found == wanted,
        _ => true,
    }
}

fn parse_files(provider: &str, entry: &Entry, files: Vec<EntryFile>, query: &Query) -> Vec<Candidate> {
    files
        .into_iter()
        .filter(|f| file_matches_episode(&f.name, query.episode))
        .filter(|f| {
            let format = SubtitleFormat::from_filename(&f.name);
            format != SubtitleFormat::Other || f.name.to_lowercase().ends_with(".zip")
        })
        .map(|file| {
            let mut candidate = Candidate::new(
                provider,
                format!("{}:{}", entry.id, file.name),
                "ja",
                file.name,
                DownloadHandle::Url(file.url),
            )
            .enrich_from_release_name();
            candidate.title = Some(entry.name.clone());
            if let Some(size) = file.size {
                candidate.extra.insert("size".to_string(), size.to_string());
            }
            candidate
        })
        .collect()
}

#[async_trait]
impl Provider for JimakuProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("jimaku api_key".to_string()))?;
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let request = client
            .get(format!("{}/entries/search", self.base_url))
            .header("Authorization", api_key)
            .query(&entry_params(query));
        let entries: Vec<Entry> = send_json(request, timeout).await?;
        let entry = match query.anilist_id {
            Some(id) => entries.iter().find(|e| e.anilist_id == Some(id)),
            None => entries.first(),
        };
        let Some(entry) = entry else {
            return Ok(Vec::new());
        };

        let mut request = client
            .get(format!("{}/entries/{}/files", self.base_url, entry.id))
            .header("Authorization", api_key);
        if let Some(episode) = query.episode {
            request = request.query(&[("episode", episode.to_string())]);
        }
        let files: Vec<EntryFile> = send_json(request, timeout).await?;
        Ok(parse_files(&self.info.name, entry, files, query))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let bytes = send_bytes(client.get(candidate.download.as_str()), self.client.timeout()).await?;
        extract_subtitle(bytes, Some(SubtitleFormat::Ass))
    }
}
