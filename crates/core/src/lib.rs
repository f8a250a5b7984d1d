pub mod config;
pub mod engine;
pub mod metrics;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod reliability;
pub mod scoring;
pub mod search;
pub mod store;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use engine::{ConnectionTest, EngineBuilder, EngineError, ProviderStatus, SubtitleEngine};
pub use plugin::{PluginLoadError, PluginWatcher, ReloadReport};
pub use provider::{
    Candidate, Provider, ProviderDescriptor, ProviderError, ProviderInfo, Query, SubtitleFormat,
};
pub use registry::{InitStatus, ProviderRegistry, RegistryError};
pub use scoring::{ScoredResult, ScoringWeights};
pub use search::{ProviderDiagnostic, ProviderOutcome, SearchOutput, SearchResponse};
