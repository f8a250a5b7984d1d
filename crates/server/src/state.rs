use std::sync::Arc;
use subfetch_core::{Config, SanitizedConfig, SubtitleEngine};

/// Shared application state
pub struct AppState {
    config: Config,
    engine: Arc<SubtitleEngine>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<SubtitleEngine>) -> Self {
        Self { config, engine }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn engine(&self) -> &SubtitleEngine {
        self.engine.as_ref()
    }
}
