//! SubSource provider.
//!
//! The API is POST-only: resolve the title to a slug, list subtitles for the
//! slug (and season), then exchange a subtitle id for a download token.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{language_code, language_name};
use crate::provider::http::{send_bytes, send_json};
use crate::provider::release::normalize_title;
use crate::provider::{
    extract_subtitle, Candidate, Credentials, DownloadHandle, LazyClient, Provider,
    ProviderError, ProviderInfo, Query, RateLimitPolicy,
};

const DEFAULT_BASE_URL: &str = "https://api.subsource.net/api";

pub struct SubSourceProvider {
    info: ProviderInfo,
    client: LazyClient,
    base_url: String,
}

impl SubSourceProvider {
    pub fn default_info() -> ProviderInfo {
        let mut info = ProviderInfo::new("subsource");
        info.languages = super::all_language_codes();
        info.rate_limit = RateLimitPolicy::new(15, 10);
        info.timeout_secs = 20;
        info.default_priority = 40;
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
struct SearchResponse {
    #[serde(default)]
    found: Vec<Title>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Title {
    title: String,
    link_name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    release_year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MovieResponse {
    #[serde(default)]
    subs: Vec<SubSourceSubtitle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubSourceSubtitle {
    sub_id: u64,
    release_name: String,
    lang: String,
    #[serde(default)]
    hi: u8,
    link_name: Option<String>,
    owner_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubResponse {
    sub: DownloadToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadToken {
    download_token: String,
}

/// Choose the title matching kind (series vs movie), name and year.
fn pick_title<'a>(titles: &'a [Title], query: &Query) -> Option<&'a Title> {
    let wanted = normalize_title(&query.title);
    let kind_ok = |t: &&Title| {
        let is_series = t
            .kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("tvseries"))
            .unwrap_or(false);
        is_series == query.is_episode()
    };
    let year_ok = |t: &&Title| match (query.year, t.release_year) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    titles
        .iter()
        .filter(kind_ok)
        .filter(year_ok)
        .find(|t| normalize_title(&t.title) == wanted)
        .or_else(|| titles.iter().filter(kind_ok).find(year_ok))
}

/// Download handles carry everything the token exchange needs.
fn handle(movie: &str, lang: &str, sub_id: u64) -> String {
    format!("{}/{}/{}", movie, lang, sub_id)
}

fn parse_subs(provider: &str, title: &Title, query: &Query, body: MovieResponse) -> Vec<Candidate> {
    body.subs
        .into_iter()
        .filter_map(|sub| {
            let language = language_code(&sub.lang)?;
            let movie = sub.link_name.as_deref().unwrap_or(&title.link_name);
            let mut candidate = Candidate::new(
                provider,
                sub.sub_id.to_string(),
                language,
                sub.release_name.clone(),
                DownloadHandle::Token(handle(movie, &sub.lang, sub.sub_id)),
            )
            .enrich_from_release_name();
            candidate.title = Some(title.title.clone());
            candidate.year = candidate.year.or(title.release_year);
            if query.is_episode() {
                candidate.season = candidate.season.or(query.season);
            }
            candidate.hearing_impaired = sub.hi != 0;
            if let Some(owner) = sub.owner_name {
                candidate.extra.insert("uploader".to_string(), owner);
            }
            Some(candidate)
        })
        .collect()
}

#[async_trait]
impl Provider for SubSourceProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let request = client
            .post(format!("{}/searchMovie", self.base_url))
            .json(&json!({ "query": query.title }));
        let found: SearchResponse = send_json(request, timeout).await?;
        let Some(title) = pick_title(&found.found, query) else {
            return Ok(Vec::new());
        };

        let langs: Vec<&str> = query
            .languages
            .iter()
            .filter_map(|code| language_name(code))
            .collect();
        let mut body = json!({ "movieName": title.link_name, "langs": langs });
        if let Some(season) = query.season.filter(|_| query.is_episode()) {
            body["season"] = json!(format!("season-{}", season));
        }
        let request = client
            .post(format!("{}/getMovie", self.base_url))
            .json(&body);
        let movie: MovieResponse = send_json(request, timeout).await?;
        Ok(parse_subs(&self.info.name, title, query, movie))
    }

    async fn download(&self, candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        let mut parts = candidate.download.as_str().splitn(3, '/');
        let (Some(movie), Some(lang), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ProviderError::Rejected(format!(
                "Invalid download handle: {}",
                candidate.download.as_str()
            )));
        };
        let client = self.client.get().await?;
        let timeout = self.client.timeout();

        let request = client
            .post(format!("{}/getSub", self.base_url))
            .json(&json!({ "movie": movie, "lang": lang, "id": id }));
        let sub: SubResponse = send_json(request, timeout).await?;

        let url = format!("{}/downloadSub/{}", self.base_url, sub.sub.download_token);
        let bytes = send_bytes(client.get(&url), timeout).await?;
        extract_subtitle(bytes, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles() -> Vec<Title> {
        serde_json::from_str::<SearchResponse>(
            r#"{"found": [
                {"title": "Example Show", "linkName": "example-show-2009", "type": "Movie", "releaseYear": 2009},
                {"title": "Example Show", "linkName": "example-show", "type": "TVSeries", "releaseYear": 2021, "seasons": [{"number": 1}]}
            ]}"#,
        )
        .unwrap()
        .found
    }

    #[test]
    fn test_pick_title_by_kind() {
        let titles = titles();
        let episode = Query::new("Example Show").with_episode(1, 3);
        assert_eq!(pick_title(&titles, &episode).unwrap().link_name, "example-show");

        let movie = Query::new("Example Show").with_year(2009);
        assert_eq!(pick_title(&titles, &movie).unwrap().link_name, "example-show-2009");

        let wrong_year = Query::new("Example Show").with_year(1990);
        assert!(pick_title(&titles, &wrong_year).is_none());
    }

    #[test]
    fn test_parse_subs() {
        let titles = titles();
        let query = Query::new("Example Show").with_episode(1, 3);
        let body: MovieResponse = serde_json::from_str(
            r#"{"subs": [
                {"subId": 55, "releaseName": "Example.Show.S01E03.1080p-GRP", "lang": "English", "hi": 1, "linkName": "example-show", "ownerName": "uploader"},
                {"subId": 56, "releaseName": "Example.Show.S01E03", "lang": "Farsi/Persian"}
            ]}"#,
        )
        .unwrap();

        let candidates = parse_subs("subsource", &titles[1], &query, body);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.language, "en");
        assert!(c.hearing_impaired);
        assert_eq!(c.download, DownloadHandle::Token("example-show/English/55".to_string()));
        assert_eq!(c.year, Some(2021));
        assert_eq!(c.release_group.as_deref(), Some("GRP"));
    }

    #[tokio::test]
    async fn test_download_rejects_malformed_handle() {
        let provider = SubSourceProvider::new(SubSourceProvider::default_info(), &Credentials::new());
        let candidate = Candidate::new(
            "subsource",
            "1",
            "en",
            "x",
            DownloadHandle::Token("no-slashes".to_string()),
        );
        assert!(matches!(
            provider.download(&candidate).await,
            Err(ProviderError::Rejected(_))
        ));
    }
}
