//! Key-value configuration store and provider health persistence.
//!
//! Both are external collaborators of the engine: it only needs
//! get/set/list-by-prefix for configuration and load/save for health records.

mod memory;
mod sqlite;

pub use memory::{MemoryConfigStore, MemoryHealthStore};
pub use sqlite::{SqliteConfigStore, SqliteHealthStore};

use thiserror::Error;

use crate::reliability::HealthRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    Poisoned,
}

/// Key for a provider-scoped setting: `provider.<name>.<field>`.
pub fn provider_key(provider: &str, field: &str) -> String {
    format!("provider.{}.{}", provider, field)
}

/// Key for a scoring weight: `scoring.<weight>`.
pub fn scoring_key(weight: &str) -> String {
    format!("scoring.{}", weight)
}

/// Key for a global reliability threshold: `reliability.<field>`.
pub fn reliability_key(field: &str) -> String {
    format!("reliability.{}", field)
}

/// Trait for key-value configuration storage.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, sorted by key.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// Trait for persisting provider health records across restarts.
pub trait HealthStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<HealthRecord>, StoreError>;

    fn save(&self, record: &HealthRecord) -> Result<(), StoreError>;

    fn delete(&self, provider: &str) -> Result<(), StoreError>;
}
