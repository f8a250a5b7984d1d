//! Testing utilities and mock implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use subfetch_core::testing::{fixtures, MockProvider};
//!
//! let slow = MockProvider::new("slow").with_delay(Duration::from_secs(5));
//! let fast = MockProvider::new("fast")
//!     .with_results(vec![fixtures::candidate("fast", "1", "Example.Show.S01E03.srt")]);
//! ```

mod mock_provider;

pub use mock_provider::MockProvider;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::provider::{Candidate, DownloadHandle, Query};

    /// Episode query used across engine tests.
    pub fn episode_query() -> Query {
        Query::new("Example Show")
            .with_episode(1, 3)
            .with_languages(["en"])
    }

    /// A candidate whose metadata is parsed from its release name.
    pub fn candidate(provider: &str, id: &str, release_name: &str) -> Candidate {
        Candidate::new(
            provider,
            id,
            "en",
            release_name,
            DownloadHandle::Token(id.to_string()),
        )
        .enrich_from_release_name()
    }

    /// A candidate synced against the given file hash.
    pub fn hashed_candidate(provider: &str, id: &str, release_name: &str, hash: &str) -> Candidate {
        let mut candidate = candidate(provider, id, release_name);
        candidate.file_hash = Some(hash.to_string());
        candidate
    }
}
