use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::reliability::{BreakerPolicy, HealthPolicy};
use crate::scoring::ScoringWeights;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Per-provider settings, keyed by provider name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("subfetch.db")
}

/// Search orchestration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum provider calls in flight across one search.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Overall search deadline in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum cached queries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            deadline_ms: default_deadline_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_deadline_ms() -> u64 {
    20_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    512
}

/// Default breaker thresholds, overridable per provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Auto-disable settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Consecutive failures before auto-disable, as a multiple of the
    /// provider's breaker threshold.
    #[serde(default = "default_auto_disable_multiplier")]
    pub auto_disable_multiplier: u32,
    #[serde(default = "default_auto_disable_cooldown_secs")]
    pub auto_disable_cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            auto_disable_multiplier: default_auto_disable_multiplier(),
            auto_disable_cooldown_secs: default_auto_disable_cooldown_secs(),
        }
    }
}

impl HealthConfig {
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            auto_disable_multiplier: self.auto_disable_multiplier,
            auto_disable_cooldown: Duration::from_secs(self.auto_disable_cooldown_secs),
        }
    }
}

fn default_auto_disable_multiplier() -> u32 {
    2
}

fn default_auto_disable_cooldown_secs() -> u64 {
    30 * 60
}

/// Plugin discovery settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginsConfig {
    /// Directory scanned for `*.toml` plugin manifests. Plugins are off when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub hot_reload: bool,
    /// Quiet period before a burst of file changes triggers a reload.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            hot_reload: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl PluginsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

/// Settings for one provider. Unset fields fall back to the provider's
/// declared defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub score_modifier: i64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub breaker_cooldown_secs: Option<u64>,
    /// Values for the provider's declared config fields.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub scoring: ScoringWeights,
    pub plugins: PluginsConfig,
    pub providers: BTreeMap<String, SanitizedProviderSettings>,
}

/// Provider settings with credential values hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    pub score_modifier: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Names of the credential fields that have a value.
    pub credentials_configured: Vec<String>,
}

impl From<&ProviderSettings> for SanitizedProviderSettings {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            enabled: settings.enabled,
            priority: settings.priority,
            score_modifier: settings.score_modifier,
            timeout_secs: settings.timeout_secs,
            max_retries: settings.max_retries,
            credentials_configured: settings
                .credentials
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            health: config.health.clone(),
            scoring: config.scoring,
            plugins: config.plugins.clone(),
            providers: config
                .providers
                .iter()
                .map(|(name, settings)| (name.clone(), settings.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "subfetch.db");
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.engine.deadline(), Duration::from_secs(20));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
        assert_eq!(config.health.auto_disable_multiplier, 2);
        assert_eq!(config.health.auto_disable_cooldown_secs, 1800);
        assert!(config.plugins.directory.is_none());
        assert!(config.plugins.hot_reload);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[engine]
max_concurrency = 3
deadline_ms = 5000

[circuit_breaker]
failure_threshold = 4

[scoring]
hash = 500
styled_format = 12

[plugins]
directory = "/etc/subfetch/plugins"
debounce_ms = 250

[providers.opensubtitles]
priority = 1
score_modifier = -5
timeout_secs = 15

[providers.opensubtitles.credentials]
api_key = "abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.max_concurrency, 3);
        assert_eq!(config.engine.cache_ttl_secs, 300);
        assert_eq!(config.circuit_breaker.policy().failure_threshold, 4);
        assert_eq!(config.scoring.hash, 500);
        assert_eq!(config.scoring.styled_format, 12);
        assert_eq!(config.scoring.title, ScoringWeights::default().title);
        assert_eq!(config.plugins.debounce(), Duration::from_millis(250));

        let os = &config.providers["opensubtitles"];
        assert_eq!(os.priority, Some(1));
        assert_eq!(os.score_modifier, -5);
        assert_eq!(os.timeout_secs, Some(15));
        assert!(os.enabled.is_none());
        assert_eq!(os.credentials["api_key"], "abc");
    }

    #[test]
    fn test_sanitized_config_hides_credentials() {
        let mut config = Config::default();
        let mut settings = ProviderSettings::default();
        settings
            .credentials
            .insert("api_key".to_string(), "secret-key".to_string());
        settings
            .credentials
            .insert("username".to_string(), "".to_string());
        config.providers.insert("subdl".to_string(), settings);

        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
        assert_eq!(
            sanitized.providers["subdl"].credentials_configured,
            vec!["api_key".to_string()]
        );
    }

    #[test]
    fn test_policies_from_config() {
        let config = Config::default();
        assert_eq!(config.circuit_breaker.policy(), BreakerPolicy::default());
        assert_eq!(config.health.policy(), HealthPolicy::default());
    }
}
