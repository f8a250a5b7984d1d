//! Types shared by every subtitle provider.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// An immutable subtitle search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    /// Series or movie title.
    pub title: String,
    /// IMDb identifier (e.g. "tt0944947").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    /// TMDB identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<u32>,
    /// AniList identifier, used by anime providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anilist_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    /// Release group of the local file, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_group: Option<String>,
    /// Target languages as lowercase ISO 639-1 codes.
    #[serde(default)]
    pub languages: BTreeSet<String>,
    /// OpenSubtitles-style movie hash of the local file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Preferred subtitle format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_preference: Option<SubtitleFormat>,
}

impl Query {
    /// Create a query for a title with no other constraints.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    pub fn with_year(mut self, year: u32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages
            .into_iter()
            .map(|l| l.into().trim().to_lowercase())
            .collect();
        self
    }

    pub fn with_file_hash(mut self, hash: impl Into<String>) -> Self {
        self.file_hash = Some(hash.into());
        self
    }

    pub fn with_release_group(mut self, group: impl Into<String>) -> Self {
        self.release_group = Some(group.into());
        self
    }

    pub fn with_format_preference(mut self, format: SubtitleFormat) -> Self {
        self.format_preference = Some(format);
        self
    }

    /// Whether this query targets a single episode of a series.
    pub fn is_episode(&self) -> bool {
        self.season.is_some() && self.episode.is_some()
    }

    /// Whether the candidate language is one of the requested languages.
    ///
    /// An empty language set accepts everything.
    pub fn wants_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.contains(&language.to_lowercase())
    }
}

/// Subtitle file format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleFormat {
    Ass,
    Ssa,
    Srt,
    Vtt,
    Sub,
    Other,
}

impl SubtitleFormat {
    /// Formats that preserve styling information.
    pub fn is_styled(self) -> bool {
        matches!(self, SubtitleFormat::Ass | SubtitleFormat::Ssa)
    }

    /// Guess the format from a file name or extension.
    pub fn from_filename(name: &str) -> Self {
        let ext = name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "ass" => SubtitleFormat::Ass,
            "ssa" => SubtitleFormat::Ssa,
            "srt" => SubtitleFormat::Srt,
            "vtt" => SubtitleFormat::Vtt,
            "sub" => SubtitleFormat::Sub,
            _ => SubtitleFormat::Other,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SubtitleFormat::Ass => "ass",
            SubtitleFormat::Ssa => "ssa",
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Sub => "sub",
            SubtitleFormat::Other => "txt",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How a candidate's content is fetched from its provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DownloadHandle {
    /// Direct URL to the subtitle or archive.
    Url(String),
    /// Provider-opaque token exchanged for content by the provider.
    Token(String),
}

impl DownloadHandle {
    pub fn as_str(&self) -> &str {
        match self {
            DownloadHandle::Url(s) | DownloadHandle::Token(s) => s,
        }
    }
}

/// A provider's proposed match for a query, before ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Name of the provider that produced this candidate.
    pub provider: String,
    /// Provider-opaque identifier.
    pub id: String,
    /// Lowercase ISO 639-1 language code.
    pub language: String,
    pub format: SubtitleFormat,
    /// Release name the subtitle was made for.
    pub release_name: String,
    pub download: DownloadHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_group: Option<String>,
    /// Movie hash this subtitle was synced against, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub hearing_impaired: bool,
    #[serde(default)]
    pub foreign_parts_only: bool,
    /// Uploader is trusted/verified by the provider.
    #[serde(default)]
    pub uploader_trusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<u64>,
    /// Free-form provider metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Candidate {
    /// Create a candidate with only the required fields set.
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        language: impl Into<String>,
        release_name: impl Into<String>,
        download: DownloadHandle,
    ) -> Self {
        let release_name = release_name.into();
        Self {
            provider: provider.into(),
            id: id.into(),
            language: language.into().to_lowercase(),
            format: SubtitleFormat::from_filename(&release_name),
            release_name,
            download,
            title: None,
            year: None,
            season: None,
            episode: None,
            release_group: None,
            file_hash: None,
            hearing_impaired: false,
            foreign_parts_only: false,
            uploader_trusted: false,
            downloads: None,
            extra: BTreeMap::new(),
        }
    }

    /// Fill season/episode/year/group from the release name where the
    /// provider did not supply them.
    pub fn enrich_from_release_name(mut self) -> Self {
        let parsed = super::release::parse_release_name(&self.release_name);
        self.season = self.season.or(parsed.season);
        self.episode = self.episode.or(parsed.episode);
        self.year = self.year.or(parsed.year);
        if self.release_group.is_none() {
            self.release_group = parsed.release_group;
        }
        if self.title.is_none() && !parsed.title.is_empty() {
            self.title = Some(parsed.title);
        }
        self
    }
}

/// Type of a declared configuration field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    /// Redacted in every API response.
    Secret,
    Integer,
    Boolean,
}

/// A configuration field a provider declares (API key, username, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl ConfigField {
    pub fn new(key: &str, label: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            field_type,
            required,
        }
    }

    /// Keys must be non-empty lowercase snake_case.
    pub fn is_well_formed(&self) -> bool {
        !self.key.is_empty()
            && !self.label.trim().is_empty()
            && self
                .key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

/// Outbound request budget for a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per window.
    pub requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(50, 30)
    }
}

/// Static metadata a provider declares about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Unique provider name.
    pub name: String,
    /// Supported languages; empty means any.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub config_fields: Vec<ConfigField>,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Priority rank used when no override is configured (lower wins).
    pub default_priority: u32,
}

impl ProviderInfo {
    /// Longest per-call timeout a provider may ask for.
    pub const MAX_TIMEOUT_SECS: u64 = 3600;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            languages: Vec::new(),
            config_fields: Vec::new(),
            rate_limit: RateLimitPolicy::default(),
            timeout_secs: 30,
            max_retries: 2,
            default_priority: 100,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, Self::MAX_TIMEOUT_SECS))
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }
}

/// Where a registered provider came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOrigin {
    Builtin,
    Plugin,
}

/// The registry's record of a provider: declared info plus runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderDescriptor {
    #[serde(flatten)]
    pub info: ProviderInfo,
    pub enabled: bool,
    /// Tie-break rank; lower ranks first.
    pub priority: u32,
    /// Signed adjustment applied to every candidate score from this provider.
    pub score_modifier: i64,
    pub origin: ProviderOrigin,
}

impl ProviderDescriptor {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_plugin(&self) -> bool {
        self.origin == ProviderOrigin::Plugin
    }
}
