//! Provider backed by a plugin's HTTP service.
//!
//! Contract: `POST {endpoint}/search` takes a `Query` and answers
//! `{"candidates": [...]}`; `POST {endpoint}/download` takes a `Candidate`
//! and answers with the raw subtitle bytes. Credentials travel as
//! `X-Subfetch-<Key>` headers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;

use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    Candidate, Credentials, DownloadHandle, LazyClient, Provider, ProviderError, ProviderInfo,
    Query, SubtitleFormat,
};

pub struct RemoteProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl RemoteProvider {
    pub fn new(base_url: impl Into<String>, info: ProviderInfo, credentials: &Credentials) -> Self {
        let headers = credentials
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (header_name(key), value.to_string()))
            .collect();
        Self {
            client: LazyClient::new(info.timeout()),
            info,
            base_url: base_url.into(),
            headers,
        }
    }

    fn post(&self, client: &reqwest::Client, path: &str) -> RequestBuilder {
        self.headers.iter().fold(
            client.post(format!("{}{}", self.base_url, path)),
            |request, (name, value)| request.header(name.as_str(), value.as_str()),
        )
    }
}

/// `api_key` → `X-Subfetch-Api-Key`.
fn header_name(key: &str) -> String {
    let parts: Vec<String> = key
        .split(['_', '-'])
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    format!("X-Subfetch-{}", parts.join("-"))
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

/// Candidate as a plugin reports it. The provider name is assigned here, and
/// unset fields are filled from the release name.
#[derive(Debug, Deserialize)]
struct WireCandidate {
    id: String,
    language: String,
    release_name: String,
    download: DownloadHandle,
    format: Option<SubtitleFormat>,
    title: Option<String>,
    year: Option<u32>,
    season: Option<u32>,
    episode: Option<u32>,
    release_group: Option<String>,
    file_hash: Option<String>,
    #[serde(default)]
    hearing_impaired: bool,
    #[serde(default)]
    foreign_parts_only: bool,
    #[serde(default)]
    uploader_trusted: bool,
    downloads: Option<u64>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

impl WireCandidate {
    fn into_candidate(self, provider: &str) -> Candidate {
        let mut candidate = Candidate::new(
            provider,
            self.id,
            self.language,
            self.release_name,
            self.download,
        );
        if let Some(format) = self.format {
            candidate.format = format;
        }
        candidate.title = self.title;
        candidate.year = self.year;
        candidate.season = self.season;
        candidate.episode = self.episode;
        candidate.release_group = self.release_group;
        candidate.file_hash = self.file_hash;
        candidate.hearing_impaired = self.hearing_impaired;
        candidate.foreign_parts_only = self.foreign_parts_only;
        candidate.uploader_trusted = self.uploader_trusted;
        candidate.downloads = self.downloads;
        candidate.extra = self.extra;
        candidate.enrich_from_release_name()
    }
}

fn parse_reply(provider: &str, reply: SearchReply) -> Vec<Candidate> {
    reply
        .candidates
        .into_iter()
        .map(|c| c.into_candidate(provider))
        .collect()
}

#[async_trait]
impl Provider for RemoteProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let client = self.client.get().await?;
        let request = self.post(client, "/search").json(query);
        let reply: SearchReply = send_json(request, self.client.timeout()).await?;
        Ok(parse_reply(&self.info.name, reply))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let request = self.post(client, "/download").json(candidate);
        send_bytes(request, self.client.timeout()).await
    }
}
