//! AnimeTosho provider.
//!
//! Subtitles are attachments extracted from fansub releases. The feed search
//! finds releases for the episode; each release's detail lists its files and
//! their subtitle attachments.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::language_code;
use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    Candidate, Credentials, DownloadHandle, LazyClient, Provider, ProviderError, ProviderInfo,
    Query, RateLimitPolicy, SubtitleFormat,
};

const DEFAULT_FEED_URL: &str = "https://feed.animetosho.org/json";
const DEFAULT_STORAGE_URL: &str = "https://animetosho.org/storage/attach";

/// Releases inspected per search.
const MAX_RELEASES: usize = 5;

pub struct AnimeToshoProvider {
    info: ProviderInfo,
    client: LazyClient,
    feed_url: String,
    storage_url: String,
}

impl AnimeToshoProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("animetosho");
        info.rate_limit = RateLimitPolicy::new(10, 10);
        info.timeout_secs = 25;
        info.default_priority = 80;
        info
    }

    pub fn new(info: ProviderInfo, _credentials: &Credentials) -> Self {
        Self {
            client: LazyClient::new(info.timeout()),
            info,
            feed_url: DEFAULT_FEED_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
        }
    }

    pub fn with_base_urls(mut self, feed: impl Into<String>, storage: impl Into<String>) -> Self {
        self.feed_url = feed.into();
        self.storage_url = storage.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    id: u64,
    title: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDetail {
    #[serde(default)]
    files: Vec<ReleaseFile>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    filename: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    info: AttachmentInfo,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentInfo {
    lang: Option<String>,
    codec: Option<String>,
    name: Option<String>,
}

/// Feed search terms: "Title 05" for episodes, the bare title otherwise.
fn feed_terms(query: &Query) -> String {
    match query.episode {
        Some(episode) => format!("{} {:02}", query.title, episode),
        None => query.title.clone(),
    }
}

fn format_of_codec(codec: Option<&str>) -> SubtitleFormat {
    match codec.map(|c| c.to_ascii_uppercase()).as_deref() {
        Some("ASS") => SubtitleFormat::Ass,
        Some("SSA") => SubtitleFormat::Ssa,
        Some("SUBRIP") | Some("SRT") | Some("UTF8") => SubtitleFormat::Srt,
        Some("WEBVTT") => SubtitleFormat::Vtt,
        _ => SubtitleFormat::Other,
    }
}

fn completed(entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
    entries
        .into_iter()
        .filter(|e| e.status.as_deref().map_or(true, |s| s == "complete"))
        .take(MAX_RELEASES)
        .collect()
}

fn parse_release(provider: &str, entry: &FeedEntry, detail: ReleaseDetail) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for file in detail.files {
        for attachment in file.attachments.into_iter().filter(|a| a.kind == "subtitle") {
            let format = format_of_codec(attachment.info.codec.as_deref());
            if format == SubtitleFormat::Other {
                continue;
            }
            let language = attachment
                .info
                .lang
                .as_deref()
                .and_then(language_code)
                .unwrap_or("en");
            let mut candidate = Candidate::new(
                provider,
                attachment.id.to_string(),
                language,
                file.filename.clone(),
                DownloadHandle::Token(attachment.id.to_string()),
            )
            .enrich_from_release_name();
            candidate.format = format;
            candidate.extra.insert("release".to_string(), entry.title.clone());
            if let Some(name) = attachment.info.name {
                candidate.extra.insert("track".to_string(), name);
            }
            candidates.push(candidate);
        }
    }
    candidates
}

/// Storage path of an attachment: zero-padded hex id.
fn attachment_url(storage: &str, id: &str) -> Result<String, ProviderError> {
    let id: u64 = id
        .parse()
        .map_err(|_| ProviderError::Rejected(format!("Invalid attachment id: {}", id)))?;
    Ok(format!("{}/{:08x}/attachment", storage, id))
}

#[async_trait]
impl Provider for AnimeToshoProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let mut request = client.get(&self.feed_url);
        request = match query.anilist_id {
            Some(id) => request.query(&[("aids", id.to_string())]),
            None => request.query(&[("q", feed_terms(query))]),
        };
        let entries: Vec<FeedEntry> = send_json(request, timeout).await?;
        let releases = completed(entries);
        debug!(provider = %self.info.name, releases = releases.len(), "Inspecting releases");

        let mut candidates = Vec::new();
        for entry in &releases {
            let request = client
                .get(&self.feed_url)
                .query(&[("show", "torrent".to_string()), ("id", entry.id.to_string())]);
            match send_json::<ReleaseDetail>(request, timeout).await {
                Ok(detail) => candidates.extend(parse_release(&self.info.name, entry, detail)),
                Err(ProviderError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(candidates)
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let url = attachment_url(&self.storage_url, candidate.download.as_str())?;
        send_bytes(client.get(&url), self.client.timeout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_keeps_text_subtitles() {
        let entry = FeedEntry {
            id: 600001,
            title: "[SubsPlease] Some Anime - 05 (1080p) [ABCD1234].mkv".to_string(),
            status: Some("complete".to_string()),
        };
        let detail: ReleaseDetail = serde_json::from_str(
            r#"{"files": [{
                "filename": "[SubsPlease] Some Anime - 05 (1080p) [ABCD1234].mkv",
                "attachments": [
                    {"id": 1048576, "type": "subtitle", "info": {"lang": "eng", "codec": "ASS", "name": "English subs"}},
                    {"id": 1048577, "type": "subtitle", "info": {"lang": "ger", "codec": "ASS"}},
                    {"id": 1048578, "type": "subtitle", "info": {"lang": "eng", "codec": "PGS"}},
                    {"id": 1048579, "type": "font", "info": {"name": "Arial.ttf"}}
                ]
            }]}"#,
        )
        .unwrap();

        let candidates = parse_release("animetosho", &entry, detail);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].language, "en");
        assert_eq!(candidates[0].format, SubtitleFormat::Ass);
        assert_eq!(candidates[0].release_group.as_deref(), Some("SubsPlease"));
        assert_eq!(candidates[0].extra.get("track").map(String::as_str), Some("English subs"));
        assert_eq!(candidates[1].language, "de");
    }

    #[test]
    fn test_completed_filters_and_caps() {
        let mut entries: Vec<FeedEntry> = (0..8)
            .map(|i| FeedEntry {
                id: i,
                title: format!("release {}", i),
                status: Some("complete".to_string()),
            })
            .collect();
        entries[0].status = Some("processing".to_string());
        let kept = completed(entries);
        assert_eq!(kept.len(), MAX_RELEASES);
        assert_eq!(kept[0].id, 1);
    }

    #[test]
    fn test_attachment_url_and_terms() {
        assert_eq!(
            attachment_url("https://s", "1048576").unwrap(),
            "https://s/00100000/attachment"
        );
        assert!(attachment_url("https://s", "x").is_err());
        assert_eq!(
            feed_terms(&Query::new("Some Anime").with_episode(1, 5)),
            "Some Anime 05"
        );
    }
}
