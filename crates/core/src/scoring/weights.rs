//! Scoring weights.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Points awarded per matched signal.
///
/// Every field can be overridden from the config file (`[scoring]`) or the
/// config store (`scoring.<field>`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScoringWeights {
    /// Exact file-hash match. Raised at scoring time to [`Self::effective_hash`].
    pub hash: i64,
    pub title: i64,
    pub year: i64,
    pub season: i64,
    pub episode: i64,
    pub release_group: i64,
    /// Bonus for the preferred format, or for styled formats when the query
    /// has no preference.
    pub styled_format: i64,
    pub trusted_uploader: i64,
    /// Subtracted from candidates that only cover foreign-language parts.
    pub foreign_parts_penalty: i64,
    /// Per-provider score modifiers are clamped to `[-max, max]`.
    pub max_provider_modifier: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            hash: 359,
            title: 180,
            year: 90,
            season: 30,
            episode: 30,
            release_group: 14,
            styled_format: 7,
            trusted_uploader: 3,
            foreign_parts_penalty: 30,
            max_provider_modifier: 50,
        }
    }
}

impl ScoringWeights {
    pub const KEYS: [&'static str; 10] = [
        "hash",
        "title",
        "year",
        "season",
        "episode",
        "release_group",
        "styled_format",
        "trusted_uploader",
        "foreign_parts_penalty",
        "max_provider_modifier",
    ];

    /// Largest magnitude accepted for any single weight.
    pub const LIMIT: i64 = 1_000_000_000;

    /// Whether `value` is an acceptable weight for `key`.
    pub fn accepts(key: &str, value: i64) -> bool {
        let in_range = (-Self::LIMIT..=Self::LIMIT).contains(&value);
        match key {
            "max_provider_modifier" => in_range && value >= 0,
            _ => in_range,
        }
    }

    /// First key holding a value outside [`Self::LIMIT`].
    pub fn out_of_range(&self) -> Option<&'static str> {
        Self::KEYS
            .into_iter()
            .find(|key| self.get(key).is_some_and(|v| !Self::accepts(key, v)))
    }

    fn slot(&mut self, key: &str) -> Option<&mut i64> {
        Some(match key {
            "hash" => &mut self.hash,
            "title" => &mut self.title,
            "year" => &mut self.year,
            "season" => &mut self.season,
            "episode" => &mut self.episode,
            "release_group" => &mut self.release_group,
            "styled_format" => &mut self.styled_format,
            "trusted_uploader" => &mut self.trusted_uploader,
            "foreign_parts_penalty" => &mut self.foreign_parts_penalty,
            "max_provider_modifier" => &mut self.max_provider_modifier,
            _ => return None,
        })
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        let mut copy = *self;
        copy.slot(key).map(|v| *v)
    }

    /// Set a weight by name. Returns false for an unknown key.
    pub fn set(&mut self, key: &str, value: i64) -> bool {
        match self.slot(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Apply `scoring.<key>` entries from the config store.
    ///
    /// Unknown keys and unparseable values are logged and skipped.
    pub fn with_overrides(mut self, entries: &[(String, String)]) -> Self {
        for (key, value) in entries {
            let name = key.strip_prefix("scoring.").unwrap_or(key);
            match value.trim().parse::<i64>() {
                Ok(v) if !Self::accepts(name, v) => {
                    warn!(key = %key, value = v, "Scoring weight override out of range, ignoring");
                }
                Ok(v) => {
                    if !self.set(name, v) {
                        warn!(key = %key, "Unknown scoring weight override, ignoring");
                    }
                }
                Err(e) => warn!(key = %key, value = %value, error = %e, "Invalid scoring weight override"),
            }
        }
        self
    }

    /// Widest swing the non-hash signals can produce between two candidates.
    fn non_hash_span(&self) -> i64 {
        [
            self.title,
            self.year,
            self.season,
            self.episode,
            self.release_group,
            self.styled_format,
            self.trusted_uploader,
        ]
        .iter()
        .fold(0i64, |acc, w| acc.saturating_add(w.saturating_abs()))
    }

    /// Hash weight actually applied.
    ///
    /// At least one point more than the widest possible gap between a
    /// hash-matched candidate that misses every other signal and a candidate
    /// that hits every other signal, so a hash match always ranks first.
    pub fn effective_hash(&self) -> i64 {
        let modifier_span = self.max_provider_modifier.max(0).saturating_mul(2);
        let floor = self
            .non_hash_span()
            .saturating_add(modifier_span)
            .saturating_add(self.foreign_parts_penalty.saturating_abs())
            .saturating_add(1);
        self.hash.max(floor)
    }
}
