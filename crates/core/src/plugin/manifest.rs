//! Plugin manifest: the TOML file describing an out-of-process provider.

use serde::Deserialize;

use super::PluginLoadError;
use crate::provider::{ConfigField, ProviderInfo, RateLimitPolicy};

/// Contents of a `<plugin>.toml` file.
///
/// ```toml
/// name = "example"
/// endpoint = "http://127.0.0.1:9300"
/// languages = ["en", "fr"]
/// timeout_secs = 15
///
/// [rate_limit]
/// requests = 5
/// window_secs = 1
///
/// [[config_fields]]
/// key = "api_key"
/// label = "API key"
/// type = "secret"
/// required = true
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub name: String,
    /// Base URL of the plugin's HTTP service.
    pub endpoint: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub config_fields: Vec<ConfigField>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub priority: Option<u32>,
}

impl PluginManifest {
    pub fn parse(source: &str, content: &str) -> Result<Self, PluginLoadError> {
        let manifest: PluginManifest =
            toml::from_str(content).map_err(|e| PluginLoadError::Manifest {
                source_name: source.to_string(),
                message: e.to_string(),
            })?;
        manifest.validate(source)?;
        Ok(manifest)
    }

    /// Checks that do not depend on other plugins or the registry.
    pub fn validate(&self, source: &str) -> Result<(), PluginLoadError> {
        let invalid = |message: String| PluginLoadError::Invalid {
            source_name: source.to_string(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(invalid(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout_secs must be positive".to_string()));
        }
        if self.timeout_secs.is_some_and(|t| t > ProviderInfo::MAX_TIMEOUT_SECS) {
            return Err(invalid(format!(
                "timeout_secs must be at most {}",
                ProviderInfo::MAX_TIMEOUT_SECS
            )));
        }
        if let Some(limit) = self.rate_limit {
            if limit.requests == 0 || limit.window_secs == 0 {
                return Err(invalid("rate_limit must allow at least one request per window".to_string()));
            }
        }
        if let Some(code) = self.languages.iter().find(|l| l.len() != 2) {
            return Err(invalid(format!("language '{}' is not a two-letter code", code)));
        }
        Ok(())
    }

    /// Endpoint without a trailing slash.
    pub fn base_url(&self) -> String {
        self.endpoint.trim().trim_end_matches('/').to_string()
    }

    pub fn info(&self) -> ProviderInfo {
        let mut info = ProviderInfo::new(self.name.trim());
        info.languages = self.languages.iter().map(|l| l.to_lowercase()).collect();
        info.config_fields = self.config_fields.clone();
        if let Some(limit) = self.rate_limit {
            info.rate_limit = limit;
        }
        if let Some(timeout) = self.timeout_secs {
            info.timeout_secs = timeout;
        }
        if let Some(retries) = self.max_retries {
            info.max_retries = retries;
        }
        if let Some(priority) = self.priority {
            info.default_priority = priority;
        }
        info
    }
}
