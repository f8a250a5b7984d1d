//! Providers compiled into the engine.
//!
//! Each one talks to a public subtitle site over HTTP. Request building and
//! response parsing are plain functions so they can be tested against
//! captured payloads without a network.

mod animetosho;
mod betaseries;
mod gestdown;
mod jimaku;
mod opensubtitles;
mod podnapisi;
mod subdl;
mod subsource;

pub use animetosho::AnimeToshoProvider;
pub use betaseries::BetaSeriesProvider;
pub use gestdown::GestdownProvider;
pub use jimaku::JimakuProvider;
pub use opensubtitles::OpenSubtitlesProvider;
pub use podnapisi::PodnapisiProvider;
pub use subdl::SubdlProvider;
pub use subsource::SubSourceProvider;

use std::sync::Arc;

use super::{Credentials, Provider, ProviderInfo};

/// Constructor of a built-in provider from its (possibly overridden) info
/// and resolved credentials.
pub type BuildFn = fn(ProviderInfo, &Credentials) -> Arc<dyn Provider>;

/// A built-in provider before initialization.
#[derive(Clone)]
pub struct BuiltinProvider {
    pub info: ProviderInfo,
    build: BuildFn,
}

impl BuiltinProvider {
    pub fn new(info: ProviderInfo, build: BuildFn) -> Self {
        Self { info, build }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn build(&self, info: ProviderInfo, credentials: &Credentials) -> Arc<dyn Provider> {
        (self.build)(info, credentials)
    }
}

impl std::fmt::Debug for BuiltinProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinProvider")
            .field("name", &self.info.name)
            .finish()
    }
}

/// Every built-in provider, in default priority order.
pub fn builtins() -> Vec<BuiltinProvider> {
    vec![
        BuiltinProvider::new(OpenSubtitlesProvider::default_info(), |info, creds| {
            Arc::new(OpenSubtitlesProvider::new(info, creds))
        }),
        BuiltinProvider::new(SubdlProvider::default_info(), |info, creds| {
            Arc::new(SubdlProvider::new(info, creds))
        }),
        BuiltinProvider::new(PodnapisiProvider::default_info(), |info, creds| {
            Arc::new(PodnapisiProvider::new(info, creds))
        }),
        BuiltinProvider::new(SubSourceProvider::default_info(), |info, creds| {
            Arc::new(SubSourceProvider::new(info, creds))
        }),
        BuiltinProvider::new(GestdownProvider::default_info(), |info, creds| {
            Arc::new(GestdownProvider::new(info, creds))
        }),
        BuiltinProvider::new(BetaSeriesProvider::default_info(), |info, creds| {
            Arc::new(BetaSeriesProvider::new(info, creds))
        }),
        BuiltinProvider::new(JimakuProvider::default_info(), |info, creds| {
            Arc::new(JimakuProvider::new(info, creds))
        }),
        BuiltinProvider::new(AnimeToshoProvider::default_info(), |info, creds| {
            Arc::new(AnimeToshoProvider::new(info, creds))
        }),
    ]
}

/// Names of all built-in providers.
pub fn builtin_names() -> Vec<String> {
    builtins().into_iter().map(|b| b.info.name).collect()
}

/// (ISO 639-1, ISO 639-2/B, ISO 639-2/T, English name)
const LANGUAGES: &[(&str, &str, &str, &str)] = &[
    ("ar", "ara", "ara", "Arabic"),
    ("bg", "bul", "bul", "Bulgarian"),
    ("cs", "cze", "ces", "Czech"),
    ("da", "dan", "dan", "Danish"),
    ("de", "ger", "deu", "German"),
    ("el", "gre", "ell", "Greek"),
    ("en", "eng", "eng", "English"),
    ("es", "spa", "spa", "Spanish"),
    ("fi", "fin", "fin", "Finnish"),
    ("fr", "fre", "fra", "French"),
    ("he", "heb", "heb", "Hebrew"),
    ("hr", "hrv", "hrv", "Croatian"),
    ("hu", "hun", "hun", "Hungarian"),
    ("id", "ind", "ind", "Indonesian"),
    ("it", "ita", "ita", "Italian"),
    ("ja", "jpn", "jpn", "Japanese"),
    ("ko", "kor", "kor", "Korean"),
    ("nl", "dut", "nld", "Dutch"),
    ("no", "nor", "nor", "Norwegian"),
    ("pl", "pol", "pol", "Polish"),
    ("pt", "por", "por", "Portuguese"),
    ("ro", "rum", "ron", "Romanian"),
    ("ru", "rus", "rus", "Russian"),
    ("sl", "slv", "slv", "Slovenian"),
    ("sr", "srp", "srp", "Serbian"),
    ("sv", "swe", "swe", "Swedish"),
    ("th", "tha", "tha", "Thai"),
    ("tr", "tur", "tur", "Turkish"),
    ("uk", "ukr", "ukr", "Ukrainian"),
    ("vi", "vie", "vie", "Vietnamese"),
    ("zh", "chi", "zho", "Chinese"),
];

/// English name of an ISO 639-1 code ("fr" -> "French").
pub(crate) fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, ..)| c.eq_ignore_ascii_case(code))
        .map(|(.., name)| *name)
}

/// ISO 639-1 code of a language given by English name or any ISO code.
pub(crate) fn language_code(value: &str) -> Option<&'static str> {
    let value = value.trim();
    LANGUAGES
        .iter()
        .find(|(c1, c2b, c2t, name)| {
            [c1, c2b, c2t, name]
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(value))
        })
        .map(|(c1, ..)| *c1)
}

/// Language codes every table-backed provider can serve.
pub(crate) fn all_language_codes() -> Vec<String> {
    LANGUAGES.iter().map(|(c, ..)| c.to_string()).collect()
}
