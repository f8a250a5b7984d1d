//! Release-name parsing for providers that only return a free-form name.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static SEASON_EPISODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})[ ._-]?E(\d{1,3})\b").unwrap());

static CROSS_EPISODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").unwrap());

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());

static SUFFIX_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-([A-Za-z0-9]+)(?:\.(?:srt|ass|ssa|vtt|sub|mkv|mp4|avi|zip))?$").unwrap()
});

static PREFIX_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\]]+)\]").unwrap());

/// Suffixes that look like groups but are source tags.
const NOT_GROUPS: &[&str] = &["dl", "rip", "web", "hd", "sd"];

/// Fields recovered from a release name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRelease {
    pub title: String,
    pub year: Option<u32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub release_group: Option<String>,
}

/// Parse a scene/fansub style release name.
pub fn parse_release_name(name: &str) -> ParsedRelease {
    let name = name.trim();
    let mut parsed = ParsedRelease::default();
    let mut title_end = name.len();

    if let Some(caps) = SEASON_EPISODE
        .captures(name)
        .or_else(|| CROSS_EPISODE.captures(name))
    {
        parsed.season = caps[1].parse().ok();
        parsed.episode = caps[2].parse().ok();
        if let Some(m) = caps.get(0) {
            title_end = title_end.min(m.start());
        }
    }

    // Skip a leading year so titles like "2012.2009.1080p" keep their name.
    for caps in YEAR.captures_iter(name) {
        let Some(m) = caps.get(0) else { continue };
        if m.start() == 0 {
            continue;
        }
        parsed.year = caps[1].parse().ok();
        title_end = title_end.min(m.start());
        break;
    }

    let mut title_start = 0;
    if let Some(caps) = PREFIX_GROUP.captures(name) {
        parsed.release_group = Some(caps[1].trim().to_string());
        if let Some(m) = caps.get(0) {
            title_start = m.end();
        }
    } else if let Some(caps) = SUFFIX_GROUP.captures(name) {
        let group = &caps[1];
        if !NOT_GROUPS.contains(&group.to_ascii_lowercase().as_str()) {
            parsed.release_group = Some(group.to_string());
        }
    }

    if title_start < title_end {
        parsed.title = clean_title(&name[title_start..title_end]);
    }
    parsed
}

/// Turn "Example.Show_-_" into "Example Show".
pub fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .to_string()
}

/// Case- and punctuation-insensitive form used for title comparison.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
