//! The engine facade: wires the registry, reliability state, orchestrator and
//! cache together and exposes search, download and the management surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{validate_config, Config, ConfigError, ProviderSettings, SanitizedConfig};
use crate::metrics;
use crate::plugin::{self, PluginLoadError, PluginRejection, PluginWatcher, ReloadReport, RemoteProvider};
use crate::provider::builtin::builtins;
use crate::provider::{
    resolve_credentials, Credentials, ErrorKind, Provider, ProviderDescriptor, ProviderError,
    ProviderInfo, ProviderOrigin, Query,
};
use crate::registry::{InitStatus, ProviderRegistry, RegisteredProvider, RegistryError};
use crate::reliability::{
    BreakerPolicy, CircuitBreakers, CircuitSnapshot, CircuitStatus, HealthMonitor, HealthPolicy,
    HealthRecord,
};
use crate::scoring::{ScoredResult, ScoringWeights};
use crate::search::{
    cache_key, summarize, OrchestratorConfig, ProviderOutcome, RateLimitStatus, RateLimiterPool,
    ResultCache, SearchOrchestrator, SearchResponse,
};
use crate::store::{
    provider_key, reliability_key, scoring_key, ConfigStore, HealthStore, MemoryConfigStore, MemoryHealthStore,
    SqliteConfigStore, SqliteHealthStore, StoreError,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plugin(#[from] PluginLoadError),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Everything the management surface reports about one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,
    pub init: InitStatus,
    pub health: Option<HealthRecord>,
    pub circuit: CircuitSnapshot,
    pub rate_limit: Option<RateLimitStatus>,
    /// Whether a search issued now would call this provider.
    pub dispatchable: bool,
}

/// Result of an ad-hoc connectivity check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionTest {
    pub provider: String,
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Timeout and retry overrides from the config file.
fn apply_overrides(mut info: ProviderInfo, settings: Option<&ProviderSettings>) -> ProviderInfo {
    if let Some(settings) = settings {
        if let Some(timeout) = settings.timeout_secs {
            info.timeout_secs = timeout;
        }
        if let Some(retries) = settings.max_retries {
            info.max_retries = retries;
        }
    }
    info
}

/// Read a typed value from the store. Unparseable values are ignored.
fn stored_value<T: std::str::FromStr>(store: &dyn ConfigStore, key: &str) -> Result<Option<T>, StoreError> {
    Ok(store.get(key)?.and_then(|raw| match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparseable stored setting");
            None
        }
    }))
}

fn stored<T: std::str::FromStr>(
    store: &dyn ConfigStore,
    provider: &str,
    field: &str,
) -> Result<Option<T>, StoreError> {
    stored_value(store, &provider_key(provider, field))
}

/// Zero thresholds would open a breaker on every call; treat them as unset.
fn positive(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

/// Global breaker and auto-disable policy: `reliability.*` store entries >
/// config file > defaults.
fn reliability_policies(
    config: &Config,
    store: &dyn ConfigStore,
) -> Result<(BreakerPolicy, HealthPolicy), StoreError> {
    let mut breaker = config.circuit_breaker.policy();
    if let Some(threshold) = positive(stored_value(store, &reliability_key("failure_threshold"))?) {
        breaker.failure_threshold = threshold;
    }
    if let Some(secs) = stored_value::<u64>(store, &reliability_key("breaker_cooldown_secs"))? {
        breaker.cooldown = Duration::from_secs(secs);
    }

    let mut health = config.health.policy();
    if let Some(multiplier) =
        positive(stored_value(store, &reliability_key("auto_disable_multiplier"))?)
    {
        health.auto_disable_multiplier = multiplier;
    }
    if let Some(secs) = stored_value::<u64>(store, &reliability_key("auto_disable_cooldown_secs"))? {
        health.auto_disable_cooldown = Duration::from_secs(secs);
    }
    Ok((breaker, health))
}

/// Runtime settings: store override > config file > declared default.
fn resolve_descriptor(
    info: ProviderInfo,
    origin: ProviderOrigin,
    settings: Option<&ProviderSettings>,
    store: &dyn ConfigStore,
) -> Result<ProviderDescriptor, StoreError> {
    let name = info.name.clone();
    let enabled = stored::<bool>(store, &name, "enabled")?
        .or(settings.and_then(|s| s.enabled))
        .unwrap_or(true);
    let priority = stored::<u32>(store, &name, "priority")?
        .or(settings.and_then(|s| s.priority))
        .unwrap_or(info.default_priority);
    let score_modifier = stored::<i64>(store, &name, "score_modifier")?
        .unwrap_or(settings.map_or(0, |s| s.score_modifier));
    Ok(ProviderDescriptor {
        info,
        enabled,
        priority,
        score_modifier,
        origin,
    })
}

/// Configures and builds a [`SubtitleEngine`].
pub struct EngineBuilder {
    config: Config,
    config_store: Option<Arc<dyn ConfigStore>>,
    health_store: Option<Arc<dyn HealthStore>>,
    builtins: bool,
    providers: Vec<Arc<dyn Provider>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_store: None,
            health_store: None,
            builtins: true,
            providers: Vec::new(),
        }
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn health_store(mut self, store: Arc<dyn HealthStore>) -> Self {
        self.health_store = Some(store);
        self
    }

    /// Skip the built-in providers.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Register an extra compiled-in provider.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub async fn build(self) -> Result<SubtitleEngine, EngineError> {
        validate_config(&self.config)?;
        let config_store = self
            .config_store
            .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()));
        let health_store = self
            .health_store
            .unwrap_or_else(|| Arc::new(MemoryHealthStore::new()));

        let weights = self
            .config
            .scoring
            .with_overrides(&config_store.list_prefix("scoring.")?);
        let (breaker_policy, health_policy) = reliability_policies(&self.config, config_store.as_ref())?;
        let health = Arc::new(HealthMonitor::load(health_policy, health_store)?);
        let breakers = Arc::new(CircuitBreakers::new(breaker_policy));
        let limiter = Arc::new(RateLimiterPool::new());
        let registry = Arc::new(ProviderRegistry::new());

        let orchestrator = SearchOrchestrator::new(
            registry.clone(),
            breakers.clone(),
            health.clone(),
            limiter.clone(),
            weights,
            OrchestratorConfig {
                max_concurrency: self.config.engine.max_concurrency,
                deadline: self.config.engine.deadline(),
            },
        );
        let cache = ResultCache::new(
            self.config.engine.cache_ttl(),
            self.config.engine.cache_capacity,
        );

        let engine = SubtitleEngine {
            config: self.config,
            config_store,
            registry,
            breakers,
            health,
            limiter,
            orchestrator,
            cache,
            reload_lock: Mutex::new(()),
        };

        if self.builtins {
            for builtin in builtins() {
                let entry = engine.prepare(builtin.info.clone(), ProviderOrigin::Builtin, |info, creds| {
                    builtin.build(info, creds)
                })?;
                engine.register(entry).await?;
            }
        }
        for provider in self.providers {
            let info = provider.info().clone();
            let entry = engine.prepare(info, ProviderOrigin::Builtin, move |_, _| provider)?;
            engine.register(entry).await?;
        }

        if engine.config.plugins.directory.is_some() {
            match engine.reload_plugins().await {
                Ok(report) => info!(
                    loaded = report.loaded.len(),
                    rejected = report.rejected.len(),
                    "Initial plugin load complete"
                ),
                Err(e) => warn!(error = %e, "Initial plugin load failed"),
            }
        }

        info!(
            providers = engine.registry.list().len(),
            max_concurrency = engine.config.engine.max_concurrency,
            deadline_ms = engine.config.engine.deadline_ms,
            "Subtitle engine ready"
        );
        Ok(engine)
    }
}

/// Provider aggregation engine.
pub struct SubtitleEngine {
    config: Config,
    config_store: Arc<dyn ConfigStore>,
    registry: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakers>,
    health: Arc<HealthMonitor>,
    limiter: Arc<RateLimiterPool>,
    orchestrator: SearchOrchestrator,
    cache: ResultCache,
    reload_lock: Mutex<()>,
}

impl SubtitleEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build an engine persisting settings and health in the configured database.
    pub async fn open(config: Config) -> Result<Self, EngineError> {
        let path = config.database.path.clone();
        let config_store = Arc::new(SqliteConfigStore::new(&path)?);
        let health_store = Arc::new(SqliteHealthStore::new(&path)?);
        EngineBuilder::new(config)
            .config_store(config_store)
            .health_store(health_store)
            .build()
            .await
    }

    pub fn config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Per-provider breaker policy. A provider-level setting (store, then
    /// file) beats the global policy.
    fn breaker_policy(&self, name: &str) -> BreakerPolicy {
        let mut policy = self.breakers.default_policy();
        let settings = self.config.providers.get(name);
        let store = self.config_store.as_ref();
        let lookup = |field: &str| -> Option<u64> {
            stored(store, name, field).unwrap_or_else(|e| {
                warn!(provider = %name, field = %field, error = %e, "Failed to read stored breaker setting");
                None
            })
        };

        let stored_threshold = lookup("failure_threshold").and_then(|t| u32::try_from(t).ok());
        if let Some(threshold) =
            positive(stored_threshold).or(positive(settings.and_then(|s| s.failure_threshold)))
        {
            policy.failure_threshold = threshold;
        }
        if let Some(secs) = lookup("breaker_cooldown_secs").or(settings.and_then(|s| s.breaker_cooldown_secs)) {
            policy.cooldown = Duration::from_secs(secs);
        }
        policy
    }

    /// Resolve settings and credentials for a provider and build its entry.
    fn prepare<F>(
        &self,
        info: ProviderInfo,
        origin: ProviderOrigin,
        build: F,
    ) -> Result<RegisteredProvider, StoreError>
    where
        F: FnOnce(ProviderInfo, &Credentials) -> Arc<dyn Provider>,
    {
        let settings = self.config.providers.get(&info.name);
        let info = apply_overrides(info, settings);
        let file_values: HashMap<String, String> = settings
            .map(|s| s.credentials.clone().into_iter().collect())
            .unwrap_or_default();
        let credentials = resolve_credentials(&info, &file_values, self.config_store.as_ref())?;

        let missing = credentials.missing_required(&info);
        let init = if missing.is_empty() {
            InitStatus::Ready
        } else {
            info!(provider = %info.name, missing = ?missing, "Provider not configured");
            InitStatus::NotConfigured { missing }
        };

        let descriptor = resolve_descriptor(info.clone(), origin, settings, self.config_store.as_ref())?;
        let provider = build(info, &credentials);
        Ok(RegisteredProvider::new(provider, descriptor, init))
    }

    async fn configure_reliability(&self, info: &ProviderInfo) {
        self.limiter.configure(&info.name, info.rate_limit).await;
        self.breakers.configure(&info.name, self.breaker_policy(&info.name));
    }

    async fn register(&self, entry: RegisteredProvider) -> Result<(), EngineError> {
        let info = entry.descriptor.info.clone();
        self.registry.register(entry)?;
        self.configure_reliability(&info).await;
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<Arc<RegisteredProvider>, EngineError> {
        self.registry
            .get(name)
            .ok_or_else(|| EngineError::ProviderNotFound(name.to_string()))
    }

    /// Search every dispatchable provider, or answer from the cache.
    pub async fn search(&self, query: &Query) -> SearchResponse {
        let started = Instant::now();
        let key = cache_key(query);
        let generation = self.registry.generation();
        let epoch = self.cache.epoch();

        if let Some(cached) = self.cache.get(&key, generation) {
            let elapsed = started.elapsed();
            metrics::SEARCH_DURATION
                .with_label_values(&["cache"])
                .observe(elapsed.as_secs_f64());
            debug!(title = %query.title, "Search served from cache");
            return SearchResponse {
                search_id: Uuid::new_v4(),
                output: (*cached).clone(),
                duration_ms: elapsed.as_millis() as u64,
                from_cache: true,
            };
        }

        let output = self.orchestrator.search(query).await;
        let elapsed = started.elapsed();
        metrics::SEARCH_DURATION
            .with_label_values(&["providers"])
            .observe(elapsed.as_secs_f64());
        info!(
            title = %query.title,
            results = output.results.len(),
            outcomes = ?summarize(&output.diagnostics),
            duration_ms = elapsed.as_millis() as u64,
            "Search completed"
        );

        // Partial answers are not cached; a retry may reach the missing providers.
        let complete = output.diagnostics.iter().all(|d| {
            !matches!(
                d.outcome,
                ProviderOutcome::Failed { .. }
                    | ProviderOutcome::TimedOut
                    | ProviderOutcome::RateLimited { .. }
            )
        });
        if complete {
            self.cache.insert(key, generation, epoch, Arc::new(output.clone()));
        }

        SearchResponse {
            search_id: Uuid::new_v4(),
            output,
            duration_ms: elapsed.as_millis() as u64,
            from_cache: false,
        }
    }

    pub async fn download(&self, result: &ScoredResult) -> Result<Vec<u8>, EngineError> {
        self.orchestrator.download(result).await
    }

    async fn status_of(&self, entry: &RegisteredProvider) -> ProviderStatus {
        let name = entry.name();
        let circuit = self.breakers.get(name).snapshot();
        let auto_disabled = self.health.is_auto_disabled(name, Utc::now());
        let dispatchable = entry.descriptor.enabled
            && entry.init.is_ready()
            && !auto_disabled
            && circuit.state != CircuitStatus::Open;
        ProviderStatus {
            descriptor: entry.descriptor.clone(),
            init: entry.init.clone(),
            health: self.health.get(name),
            circuit,
            rate_limit: self.limiter.get_status(name).await,
            dispatchable,
        }
    }

    /// Every registered provider, sorted by priority then name.
    pub async fn list_providers(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::new();
        for entry in self.registry.list() {
            statuses.push(self.status_of(&entry).await);
        }
        statuses
    }

    pub async fn provider_status(&self, name: &str) -> Result<ProviderStatus, EngineError> {
        let entry = self.entry(name)?;
        Ok(self.status_of(&entry).await)
    }

    fn update_setting(
        &self,
        name: &str,
        field: &str,
        value: String,
        apply: impl FnOnce(&mut ProviderDescriptor),
    ) -> Result<ProviderDescriptor, EngineError> {
        self.entry(name)?;
        self.config_store.set(&provider_key(name, field), &value)?;
        let descriptor = self.registry.update_descriptor(name, apply)?;
        self.cache.clear();
        info!(provider = %name, field = %field, value = %value, "Provider setting updated");
        Ok(descriptor)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<ProviderDescriptor, EngineError> {
        self.update_setting(name, "enabled", enabled.to_string(), |d| d.enabled = enabled)
    }

    pub fn set_priority(&self, name: &str, priority: u32) -> Result<ProviderDescriptor, EngineError> {
        self.update_setting(name, "priority", priority.to_string(), |d| d.priority = priority)
    }

    pub fn set_score_modifier(&self, name: &str, modifier: i64) -> Result<ProviderDescriptor, EngineError> {
        self.update_setting(name, "score_modifier", modifier.to_string(), |d| {
            d.score_modifier = modifier
        })
    }

    /// Clear auto-disable and the failure counter, and close the circuit.
    pub fn reenable(&self, name: &str) -> Result<HealthRecord, EngineError> {
        self.entry(name)?;
        let record = self.health.reenable(name);
        self.breakers.get(name).reset();
        self.cache.clear();
        Ok(record)
    }

    pub fn health(&self, name: &str) -> Option<HealthRecord> {
        self.health.get(name)
    }

    pub fn weights(&self) -> ScoringWeights {
        self.orchestrator.weights()
    }

    /// Change one scoring weight and persist it.
    pub fn set_weight(&self, key: &str, value: i64) -> Result<ScoringWeights, EngineError> {
        let mut weights = self.orchestrator.weights();
        if !weights.set(key, value) {
            return Err(EngineError::InvalidValue {
                key: key.to_string(),
                message: "unknown scoring weight".to_string(),
            });
        }
        if !ScoringWeights::accepts(key, value) {
            return Err(EngineError::InvalidValue {
                key: key.to_string(),
                message: format!("must be within ±{}", ScoringWeights::LIMIT),
            });
        }
        self.config_store.set(&scoring_key(key), &value.to_string())?;
        self.orchestrator.set_weights(weights);
        self.cache.clear();
        info!(weight = %key, value, "Scoring weight updated");
        Ok(weights)
    }

    /// Run the provider's connectivity check under its timeout and rate limit.
    ///
    /// The outcome is reported only; it is not recorded in health or breaker state.
    pub async fn test_provider(&self, name: &str) -> Result<ConnectionTest, EngineError> {
        let entry = self.entry(name)?;
        let failed = |e: ProviderError, elapsed: Duration| ConnectionTest {
            provider: name.to_string(),
            ok: false,
            latency_ms: elapsed.as_millis() as u64,
            error_kind: Some(e.kind()),
            error: Some(e.to_string()),
        };
        if let InitStatus::NotConfigured { missing } = &entry.init {
            return Ok(failed(
                ProviderError::NotConfigured(missing.join(", ")),
                Duration::ZERO,
            ));
        }

        let timeout = entry.descriptor.info.timeout();
        let started = Instant::now();
        if let Err(e) = self.limiter.acquire(name, timeout).await {
            return Ok(failed(e, started.elapsed()));
        }
        let result = match tokio::time::timeout(timeout, entry.provider.test_connection()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        let elapsed = started.elapsed();
        Ok(match result {
            Ok(()) => {
                info!(provider = %name, latency_ms = elapsed.as_millis() as u64, "Connection test passed");
                ConnectionTest {
                    provider: name.to_string(),
                    ok: true,
                    latency_ms: elapsed.as_millis() as u64,
                    error: None,
                    error_kind: None,
                }
            }
            Err(e) => {
                warn!(provider = %name, error = %e, "Connection test failed");
                failed(e, elapsed)
            }
        })
    }

    /// Re-scan the plugin directory and atomically swap in the new plugin set.
    pub async fn reload_plugins(&self) -> Result<ReloadReport, EngineError> {
        let _guard = self.reload_lock.lock().await;
        let Some(dir) = self.config.plugins.directory.as_deref() else {
            return Ok(ReloadReport::default());
        };

        let discovery = match plugin::discover(dir) {
            Ok(discovery) => discovery,
            Err(e) => {
                metrics::PLUGIN_RELOADS.with_label_values(&["failed"]).inc();
                warn!(error = %e, "Plugin scan failed");
                return Err(e.into());
            }
        };

        let mut report = ReloadReport {
            rejected: discovery.rejected,
            ..Default::default()
        };
        let mut entries = Vec::new();
        for manifest in discovery.manifests {
            let base_url = manifest.base_url();
            let prepared = self.prepare(manifest.info(), ProviderOrigin::Plugin, |info, creds| {
                Arc::new(RemoteProvider::new(base_url, info, creds))
            });
            match prepared {
                Ok(entry) => entries.push(entry),
                Err(e) => report.rejected.push(PluginRejection {
                    source: manifest.name.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let swap = self.registry.replace_plugins(entries);
        for (name, e) in swap.rejected {
            report.rejected.push(PluginRejection {
                source: name,
                reason: e.to_string(),
            });
        }
        for name in &swap.registered {
            if let Some(entry) = self.registry.get(name) {
                self.configure_reliability(&entry.descriptor.info).await;
            }
        }
        for name in &swap.removed {
            self.limiter.remove(name).await;
            self.breakers.remove(name);
        }
        report.loaded = swap.registered;
        report.removed = swap.removed;
        self.cache.clear();

        metrics::PLUGINS_LOADED.set(report.loaded.len() as i64);
        metrics::PLUGIN_RELOADS
            .with_label_values(&[report.metric_label()])
            .inc();
        info!(
            directory = %dir.display(),
            loaded = report.loaded.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            "Plugins reloaded"
        );
        Ok(report)
    }

    /// Start hot reload when a plugin directory is configured and enabled.
    ///
    /// The watcher holds a weak reference; it stops reloading once the engine
    /// is dropped.
    pub fn start_plugin_watcher(self: &Arc<Self>) -> Result<Option<PluginWatcher>, EngineError> {
        let plugins = &self.config.plugins;
        let Some(dir) = plugins.directory.as_deref() else {
            return Ok(None);
        };
        if !plugins.hot_reload {
            return Ok(None);
        }
        ensure_dir(dir)?;

        let engine = Arc::downgrade(self);
        let watcher = PluginWatcher::spawn(dir, plugins.debounce(), move || {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                if let Err(e) = engine.reload_plugins().await {
                    warn!(error = %e, "Hot reload failed");
                }
            }
        })?;
        Ok(Some(watcher))
    }
}

fn ensure_dir(dir: &Path) -> Result<(), PluginLoadError> {
    std::fs::create_dir_all(dir).map_err(|e| PluginLoadError::Io {
        path: dir.display().to_string(),
        message: e.to_string(),
    })
}
