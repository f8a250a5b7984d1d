//! Mock provider for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::provider::{
    Candidate, Provider, ProviderDescriptor, ProviderError, ProviderInfo, ProviderOrigin, Query,
    RateLimitPolicy,
};

/// Decrements the in-flight counter when the call finishes or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the Provider trait.
///
/// Provides controllable behavior for testing:
/// - Return configurable candidates and download content
/// - Inject one-shot or persistent errors
/// - Delay every call, to exercise deadlines and timeouts
/// - Record queries and the peak number of concurrent calls
///
/// # Example
///
/// ```rust,ignore
/// use subfetch_core::testing::{fixtures, MockProvider};
///
/// let provider = MockProvider::new("mock")
///     .with_results(vec![fixtures::candidate("mock", "1", "Show.S01E01.srt")])
///     .with_delay(Duration::from_millis(50));
///
/// let results = provider.search(&fixtures::episode_query()).await?;
/// assert_eq!(results.len(), 1);
/// assert_eq!(provider.search_count(), 1);
/// ```
pub struct MockProvider {
    info: ProviderInfo,
    results: Mutex<Vec<Candidate>>,
    content: Mutex<Vec<u8>>,
    /// Errors returned by the next calls, in order.
    queued_errors: Mutex<VecDeque<ProviderError>>,
    /// Error returned by every call once the queue is empty.
    error: Mutex<Option<ProviderError>>,
    delay: Mutex<Duration>,
    searches: Mutex<Vec<Query>>,
    downloads: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.info.name)
            .field("searches", &self.search_count())
            .field("peak", &self.peak_concurrency())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockProvider {
    /// Create a mock with no results and a generous rate limit.
    pub fn new(name: &str) -> Self {
        let mut info = ProviderInfo::new(name);
        info.rate_limit = RateLimitPolicy::new(10_000, 1);
        info.max_retries = 0;
        Self::with_info(info)
    }

    pub fn with_info(info: ProviderInfo) -> Self {
        Self {
            info,
            results: Mutex::new(Vec::new()),
            content: Mutex::new(b"1\n00:00:01,000 --> 00:00:02,000\nHello\n".to_vec()),
            queued_errors: Mutex::new(VecDeque::new()),
            error: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            searches: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_results(self, results: Vec<Candidate>) -> Self {
        self.set_results(results);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    /// Fail every call with `error`.
    pub fn with_error(self, error: ProviderError) -> Self {
        self.set_error(Some(error));
        self
    }

    pub fn with_content(self, content: &[u8]) -> Self {
        *lock(&self.content) = content.to_vec();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.info.timeout_secs = secs;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.info.max_retries = retries;
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.info.rate_limit = policy;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.info.default_priority = priority;
        self
    }

    pub fn set_results(&self, results: Vec<Candidate>) {
        *lock(&self.results) = results;
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn set_error(&self, error: Option<ProviderError>) {
        *lock(&self.error) = error;
    }

    /// Fail only the next call with `error`.
    pub fn push_error(&self, error: ProviderError) {
        lock(&self.queued_errors).push_back(error);
    }

    pub fn recorded_searches(&self) -> Vec<Query> {
        lock(&self.searches).clone()
    }

    pub fn search_count(&self) -> usize {
        lock(&self.searches).len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Descriptor as the registry would build it with no overrides.
    pub fn descriptor(&self, origin: ProviderOrigin) -> ProviderDescriptor {
        ProviderDescriptor {
            info: self.info.clone(),
            enabled: true,
            priority: self.info.default_priority,
            score_modifier: 0,
            origin,
        }
    }

    async fn enter(&self) -> Result<InFlight<'_>, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.queued_errors).pop_front() {
            return Err(error);
        }
        if let Some(error) = lock(&self.error).clone() {
            return Err(error);
        }
        Ok(guard)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Result<Vec<Candidate>, ProviderError> {
        lock(&self.searches).push(query.clone());
        let _guard = self.enter().await?;
        let name = self.info.name.clone();
        Ok(lock(&self.results)
            .iter()
            .cloned()
            .map(|mut c| {
                c.provider = name.clone();
                c
            })
            .collect())
    }

    async fn download(&self, _candidate: &Candidate) -> Result<Vec<u8>, ProviderError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await?;
        Ok(lock(&self.content).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_results_tagged_with_name() {
        let mock = MockProvider::new("mock")
            .with_results(vec![fixtures::candidate("other", "1", "Show.S01E01.srt")]);
        let results = mock.search(&fixtures::episode_query()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, "mock");
        assert_eq!(mock.search_count(), 1);
    }

    #[tokio::test]
    async fn test_queued_error_then_persistent_error() {
        let mock = MockProvider::new("mock");
        mock.push_error(ProviderError::Parse("bad".into()));

        assert!(matches!(
            mock.search(&fixtures::episode_query()).await,
            Err(ProviderError::Parse(_))
        ));
        assert!(mock.search(&fixtures::episode_query()).await.is_ok());

        mock.set_error(Some(ProviderError::Auth("nope".into())));
        assert!(matches!(
            mock.search(&fixtures::episode_query()).await,
            Err(ProviderError::Auth(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_concurrency_recorded() {
        let mock = Arc::new(MockProvider::new("mock").with_delay(Duration::from_millis(100)));
        let query = fixtures::episode_query();

        let calls = (0..3).map(|_| {
            let mock = mock.clone();
            let query = query.clone();
            async move { mock.search(&query).await }
        });
        futures::future::join_all(calls).await;

        assert_eq!(mock.peak_concurrency(), 3);
        assert_eq!(mock.in_flight.load(Ordering::SeqCst), 0);
    }
}
