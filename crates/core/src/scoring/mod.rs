//! Candidate relevance scoring and ranking.
//!
//! Scoring is a pure function of (query, candidate, weights). Ranking sorts by
//! score, then format bonus, then provider priority, keeping first-seen order
//! for anything still tied.

mod weights;

pub use weights::ScoringWeights;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::provider::release::{normalize_title, parse_release_name};
use crate::provider::{Candidate, Query};

/// A signal that contributed to a score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Hash,
    Title,
    Year,
    Season,
    Episode,
    ReleaseGroup,
    Format,
    TrustedUploader,
    ForeignPartsOnly,
    ProviderModifier,
}

/// Points contributed by each matched signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub signals: BTreeMap<Signal, i64>,
}

impl ScoreBreakdown {
    fn add(&mut self, signal: Signal, points: i64) {
        if points != 0 {
            self.signals.insert(signal, points);
        }
    }

    pub fn total(&self) -> i64 {
        self.signals
            .values()
            .fold(0i64, |acc, points| acc.saturating_add(*points))
    }

    pub fn matched(&self, signal: Signal) -> bool {
        self.signals.contains_key(&signal)
    }

    pub fn points(&self, signal: Signal) -> i64 {
        self.signals.get(&signal).copied().unwrap_or(0)
    }
}

/// A candidate with its score and tie-break attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredResult {
    pub candidate: Candidate,
    pub score: i64,
    pub breakdown: ScoreBreakdown,
    /// Priority rank of the producing provider; lower ranks first on ties.
    pub provider_priority: u32,
}

impl ScoredResult {
    pub fn format_bonus(&self) -> i64 {
        self.breakdown.points(Signal::Format)
    }
}

/// Ranking attributes of the provider that produced a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderRank {
    pub priority: u32,
    pub score_modifier: i64,
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn title_matches(query: &Query, candidate: &Candidate) -> bool {
    let wanted = normalize_title(&query.title);
    if wanted.is_empty() {
        return false;
    }
    let offered = match &candidate.title {
        Some(title) => normalize_title(title),
        None => normalize_title(&parse_release_name(&candidate.release_name).title),
    };
    offered == wanted
}

fn format_matches(query: &Query, candidate: &Candidate) -> bool {
    match query.format_preference {
        Some(preferred) => candidate.format == preferred,
        None => candidate.format.is_styled(),
    }
}

/// Score one candidate against a query.
///
/// `score_modifier` is the producing provider's signed adjustment; it is
/// clamped to `weights.max_provider_modifier` and added last.
pub fn score(
    query: &Query,
    candidate: &Candidate,
    weights: &ScoringWeights,
    score_modifier: i64,
) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::default();

    if let (Some(wanted), Some(offered)) = (&query.file_hash, &candidate.file_hash) {
        if !wanted.is_empty() && eq_ignore_case(wanted, offered) {
            breakdown.add(Signal::Hash, weights.effective_hash());
        }
    }

    if title_matches(query, candidate) {
        breakdown.add(Signal::Title, weights.title);
    }

    if query.year.is_some() && query.year == candidate.year {
        breakdown.add(Signal::Year, weights.year);
    }
    if query.season.is_some() && query.season == candidate.season {
        breakdown.add(Signal::Season, weights.season);
    }
    if query.episode.is_some() && query.episode == candidate.episode {
        breakdown.add(Signal::Episode, weights.episode);
    }

    if let (Some(wanted), Some(offered)) = (&query.release_group, &candidate.release_group) {
        if eq_ignore_case(wanted, offered) {
            breakdown.add(Signal::ReleaseGroup, weights.release_group);
        }
    }

    if format_matches(query, candidate) {
        breakdown.add(Signal::Format, weights.styled_format);
    }
    if candidate.uploader_trusted {
        breakdown.add(Signal::TrustedUploader, weights.trusted_uploader);
    }
    if candidate.foreign_parts_only {
        breakdown.add(Signal::ForeignPartsOnly, weights.foreign_parts_penalty.saturating_abs().saturating_neg());
    }

    let cap = weights.max_provider_modifier.max(0);
    breakdown.add(Signal::ProviderModifier, score_modifier.clamp(-cap, cap));

    breakdown
}

/// Tie-break comparison: score desc, format bonus desc, priority asc.
///
/// Equal results compare `Equal`, so a stable sort keeps first-seen order.
pub fn compare(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.format_bonus().cmp(&a.format_bonus()))
        .then_with(|| a.provider_priority.cmp(&b.provider_priority))
}

/// Score and rank candidates, in the order they were collected.
pub fn rank<I>(query: &Query, candidates: I, weights: &ScoringWeights) -> Vec<ScoredResult>
where
    I: IntoIterator<Item = (Candidate, ProviderRank)>,
{
    let mut results: Vec<ScoredResult> = candidates
        .into_iter()
        .map(|(candidate, rank)| {
            let breakdown = score(query, &candidate, weights, rank.score_modifier);
            ScoredResult {
                score: breakdown.total(),
                breakdown,
                candidate,
                provider_priority: rank.priority,
            }
        })
        .collect();
    results.sort_by(compare);
    results
}
