//! Gestdown provider, a JSON front-end to Addic7ed. TV episodes only.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{language_code, language_name};
use crate::provider::http::{send_bytes, send_json};
use crate::provider::{
    Candidate, Credentials, DownloadHandle, LazyClient, Provider, ProviderError, ProviderInfo,
    Query, RateLimitPolicy, SubtitleFormat,
};

const DEFAULT_BASE_URL: &str = "https://api.gestdown.info";

pub struct GestdownProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
}

impl GestdownProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("gestdown");
        info.languages = super::all_language_codes();
        info.rate_limit = RateLimitPolicy::new(10, 10);
        info.timeout_secs = 20;
        info.default_priority = 50;
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

#[derive(Debug, Deserialize)]
struct ShowsResponse {
    #[serde(default)]
    shows: Vec<Show>,
}

#[derive(Debug, Deserialize)]
struct Show {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubtitlesResponse {
    #[serde(default)]
    matching_subtitles: Vec<GestdownSubtitle>,
    episode: Option<Episode>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    season: Option<u32>,
    number: Option<u32>,
    show: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GestdownSubtitle {
    subtitle_id: String,
    version: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    hearing_impaired: bool,
    download_uri: String,
    language: String,
    download_count: Option<u64>,
}

/// Pick the show whose name matches the query title, falling back to the first.
fn pick_show<'a>(shows: &'a [Show], title: &str) -> Option<&'a Show> {
    let wanted = crate::provider::release::normalize_title(title);
    shows
        .iter()
        .find(|s| crate::provider::release::normalize_title(&s.name) == wanted)
        .or_else(|| shows.first())
}

fn parse_subtitles(provider: &str, show_name: &str, body: SubtitlesResponse) -> Vec<Candidate> {
    let (season, episode) = body
        .episode
        .as_ref()
        .map(|e| (e.season, e.number))
        .unwrap_or((None, None));
    let title = body
        .episode
        .and_then(|e| e.show)
        .unwrap_or_else(|| show_name.to_string());

    body.matching_subtitles
        .into_iter()
        .filter(|s| s.completed)
        .map(|sub| {
            let version = sub.version.unwrap_or_default();
            let language = language_code(&sub.language).unwrap_or("en");
            let release = match (season, episode) {
                (Some(s), Some(e)) => format!("{} S{:02}E{:02} {}", title, s, e, version),
                _ => format!("{} {}", title, version),
            };
            let mut candidate = Candidate::new(
                provider,
                sub.subtitle_id,
                language,
                release.trim().to_string(),
                DownloadHandle::Url(sub.download_uri),
            );
            candidate.format = SubtitleFormat::Srt;
            candidate.title = Some(title.clone());
            candidate.season = season;
            candidate.episode = episode;
            candidate.hearing_impaired = sub.hearing_impaired;
            candidate.downloads = sub.download_count;
            // Addic7ed versions are "720p-GROUP" or just "GROUP".
            let group = version.rsplit('-').next().unwrap_or_default().trim();
            if !group.is_empty() {
                candidate.release_group = Some(group.to_string());
            }
            candidate
        })
        .collect()
}

#[async_trait]
impl Provider for GestdownProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let (Some(season), Some(episode)) = (query.season, query.episode) else {
            return Ok(Vec::new());
        };
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let url = format!(
            "{}/shows/search/{}",
            self.base_url,
            urlencoding::encode(&query.title)
        );
        let shows: ShowsResponse = match send_json(client.get(&url), timeout).await {
            Ok(shows) => shows,
            Err(ProviderError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let Some(show) = pick_show(&shows.shows, &query.title) else {
            return Ok(Vec::new());
        };
        debug!(provider = %self.info.name, show = %show.name, "Resolved show");

        let languages: Vec<&str> = if query.languages.is_empty() {
            vec!["en"]
        } else {
            query.languages.iter().map(String::as_str).collect()
        };

        let mut candidates = Vec::new();
        for code in languages {
            let Some(name) = language_name(code) else {
                continue;
            };
            let url = format!(
                "{}/subtitles/get/{}/{}/{}/{}",
                self.base_url, show.id, season, episode, name
            );
            match send_json::<SubtitlesResponse>(client.get(&url), timeout).await {
                Ok(body) => candidates.extend(parse_subtitles(&self.info.name, &show.name, body)),
                Err(ProviderError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(candidates)
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.get().await?;
        let url = format!("{}{}", self.base_url, candidate.download.as_str());
        send_bytes(client.get(&url), self.client.timeout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_show_prefers_exact_title() {
        let shows: ShowsResponse = serde_json::from_str(
            r#"{"shows": [
                {"id": "a", "name": "Example Show (US)", "nbSeasons": 3},
                {"id": "b", "name": "Example Show", "nbSeasons": 5}
            ]}"#,
        )
        .unwrap();
        assert_eq!(pick_show(&shows.shows, "example show").unwrap().id, "b");
        assert_eq!(pick_show(&shows.shows, "Unknown").unwrap().id, "a");
        assert!(pick_show(&[], "x").is_none());
    }

    #[test]
    fn test_parse_subtitles_keeps_completed() {
        let body: SubtitlesResponse = serde_json::from_str(
            r#"{
                "matchingSubtitles": [
                    {
                        "subtitleId": "e4b1",
                        "version": "720p-GRP",
                        "completed": true,
                        "hearingImpaired": false,
                        "downloadUri": "/subtitles/download/e4b1",
                        "language": "English",
                        "downloadCount": 77
                    },
                    {
                        "subtitleId": "f000",
                        "version": "WIP",
                        "completed": false,
                        "downloadUri": "/subtitles/download/f000",
                        "language": "English"
                    }
                ],
                "episode": { "season": 1, "number": 3, "title": "Pilot", "show": "Example Show" }
            }"#,
        )
        .unwrap();

        let candidates = parse_subtitles("gestdown", "Example Show", body);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.release_name, "Example Show S01E03 720p-GRP");
        assert_eq!(c.release_group.as_deref(), Some("GRP"));
        assert_eq!(c.season, Some(1));
        assert_eq!(c.episode, Some(3));
        assert_eq!(c.language, "en");
        assert_eq!(c.downloads, Some(77));
    }

    #[tokio::test]
    async fn test_movie_query_returns_nothing() {
        let provider = GestdownProvider::new(GestdownProvider::default_info(), &Credentials::new())
            .with_base_url("http://127.0.0.1:9");
        let results = provider.search(&Query::new("Some Movie")).await.unwrap();
        assert!(results.is_empty());
    }
}
