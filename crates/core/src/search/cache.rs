//! Short-TTL cache of ranked search output.
//!
//! Keys are derived from a normalized query, so requests that differ only in
//! case, surrounding whitespace or language order share an entry. Each entry
//! remembers the registry generation it was computed under and is dropped
//! once the provider set changes. Every [`ResultCache::clear`] starts a new
//! epoch, and output computed during an earlier epoch is not stored.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::SearchOutput;
use crate::metrics;
use crate::provider::Query;

fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Canonical text form of a query: fixed field order, case-folded, trimmed.
pub fn normalize_query(query: &Query) -> String {
    let languages = query
        .languages
        .iter()
        .map(|l| l.trim().to_lowercase())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(",");
    [
        format!("title={}", fold(&query.title)),
        format!("imdb={}", opt(&query.imdb_id.as_deref().map(fold))),
        format!("tmdb={}", opt(&query.tmdb_id)),
        format!("anilist={}", opt(&query.anilist_id)),
        format!("year={}", opt(&query.year)),
        format!("season={}", opt(&query.season)),
        format!("episode={}", opt(&query.episode)),
        format!("group={}", opt(&query.release_group.as_deref().map(fold))),
        format!("languages={}", languages),
        format!("hash={}", opt(&query.file_hash.as_deref().map(fold))),
        format!("format={}", opt(&query.format_preference)),
    ]
    .join("\n")
}

/// SHA-256 of the normalized query, hex encoded.
pub fn cache_key(query: &Query) -> String {
    let digest = Sha256::digest(normalize_query(query).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

struct CacheEntry {
    output: Arc<SearchOutput>,
    created_at: Instant,
    generation: u64,
}

/// TTL cache keyed by [`cache_key`].
pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    epoch: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached output for `key`, if fresh and computed under `generation`.
    pub fn get(&self, key: &str, generation: u64) -> Option<Arc<SearchOutput>> {
        let mut entries = self.lock();
        let fresh = match entries.get(key) {
            Some(entry) => entry.created_at.elapsed() < self.ttl && entry.generation == generation,
            None => {
                metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                return None;
            }
        };
        if fresh {
            metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            entries.get(key).map(|e| e.output.clone())
        } else {
            entries.remove(key);
            metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
            None
        }
    }

    /// Number of clears so far. Capture it before computing output to insert.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Store `output`, unless the cache was cleared since `epoch` was read.
    pub fn insert(&self, key: String, generation: u64, epoch: u64, output: Arc<SearchOutput>) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.lock();
        if self.epoch() != epoch {
            debug!("Cache cleared while searching, not storing result");
            return;
        }
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.created_at.elapsed() < ttl && e.generation == generation);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                output,
                created_at: Instant::now(),
                generation,
            },
        );
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.lock();
        if !entries.is_empty() {
            debug!(entries = entries.len(), "Clearing result cache");
        }
        entries.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SubtitleFormat;

    fn output() -> Arc<SearchOutput> {
        Arc::new(SearchOutput {
            results: Vec::new(),
            diagnostics: Vec::new(),
        })
    }

    #[test]
    fn test_normalization_ignores_case_whitespace_and_language_order() {
        let a = Query::new("  Example   Show ")
            .with_episode(1, 3)
            .with_languages(["EN", "fr"]);
        let b = Query::new("example show")
            .with_episode(1, 3)
            .with_languages(["fr", "en"]);
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn test_distinct_queries_have_distinct_keys() {
        let base = Query::new("Example Show").with_episode(1, 3);
        let others = vec![
            Query::new("Example Show").with_episode(1, 4),
            Query::new("Example Show").with_episode(1, 3).with_year(2020),
            Query::new("Example Show")
                .with_episode(1, 3)
                .with_format_preference(SubtitleFormat::Ass),
            Query::new("Example Show").with_episode(1, 3).with_file_hash("abc"),
            Query::new("Example Shows").with_episode(1, 3),
        ];
        for other in others {
            assert_ne!(cache_key(&base), cache_key(&other), "{:?}", other);
        }
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = cache_key(&Query::new("x"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache.insert("k".into(), 1, 0, output());
        assert!(cache.get("k", 1).is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k", 1).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k", 1).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_change_invalidates() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache.insert("k".into(), 1, 0, output());
        assert!(cache.get("k", 2).is_none());
        assert!(cache.get("k", 1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_after_clear_is_dropped() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let epoch = cache.epoch();
        cache.clear();
        cache.insert("k".into(), 1, epoch, output());
        assert!(cache.is_empty());

        cache.insert("k".into(), 1, cache.epoch(), output());
        assert!(cache.get("k", 1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), 1, 0, output());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("b".into(), 1, 0, output());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("c".into(), 1, 0, output());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", 1).is_none());
        assert!(cache.get("b", 1).is_some());
        assert!(cache.get("c", 1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_zero_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        cache.insert("a".into(), 1, 0, output());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), 1);

        let disabled = ResultCache::new(Duration::ZERO, 10);
        disabled.insert("a".into(), 1, 0, output());
        assert!(disabled.is_empty());
    }
}
