//! Provider registry.
//!
//! The registry holds an immutable map behind an `Arc`. Every mutation builds
//! a new map and swaps it in, so readers holding a snapshot never observe a
//! half-applied change. Each swap bumps a generation counter that caches use
//! to detect provider-set changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::provider::{Provider, ProviderDescriptor, ProviderOrigin};
use crate::reliability::{CircuitBreakers, HealthMonitor};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Provider name cannot be empty")]
    EmptyName,

    #[error("Provider name '{0}' contains invalid characters")]
    InvalidName(String),

    #[error("Provider '{descriptor}' descriptor does not match implementation '{implementation}'")]
    NameMismatch {
        descriptor: String,
        implementation: String,
    },

    #[error("Provider '{0}' is already registered")]
    Duplicate(String),

    #[error("Plugin '{0}' collides with a built-in provider")]
    BuiltinCollision(String),

    #[error("Provider '{provider}' declares malformed config field '{key}'")]
    MalformedField { provider: String, key: String },

    #[error("Provider not found: {0}")]
    NotFound(String),
}

/// Whether a provider resolved everything it needs to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InitStatus {
    Ready,
    /// Required config fields have no value; excluded from dispatch.
    NotConfigured { missing: Vec<String> },
}

impl InitStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitStatus::Ready)
    }
}

/// A provider implementation together with its registry record.
pub struct RegisteredProvider {
    pub provider: Arc<dyn Provider>,
    pub descriptor: ProviderDescriptor,
    pub init: InitStatus,
}

impl RegisteredProvider {
    pub fn new(provider: Arc<dyn Provider>, descriptor: ProviderDescriptor, init: InitStatus) -> Self {
        Self {
            provider,
            descriptor,
            init,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("descriptor", &self.descriptor)
            .field("init", &self.init)
            .finish_non_exhaustive()
    }
}

/// Why a registered provider was left out of a search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    AutoDisabled,
    CircuitOpen,
    NotConfigured,
}

/// Registry entries split into dispatchable and skipped.
#[derive(Debug, Default)]
pub struct DispatchPlan {
    /// Sorted by priority, then name.
    pub dispatchable: Vec<Arc<RegisteredProvider>>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Outcome of swapping in a new plugin set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub registered: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<(String, RegistryError)>,
}

type Entries = HashMap<String, Arc<RegisteredProvider>>;

/// Concurrency-safe name → provider map.
pub struct ProviderRegistry {
    entries: RwLock<Arc<Entries>>,
    generation: AtomicU64,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Current immutable view of every entry.
    pub fn snapshot(&self) -> Arc<Entries> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Incremented on every change to the provider set or a descriptor.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Apply `f` to a copy of the entries and swap the result in.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Entries = (**guard).clone();
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }

    fn validate(entry: &RegisteredProvider) -> Result<(), RegistryError> {
        let name = entry.descriptor.name();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if entry.provider.name() != name {
            return Err(RegistryError::NameMismatch {
                descriptor: name.to_string(),
                implementation: entry.provider.name().to_string(),
            });
        }
        let mut seen = Vec::new();
        for field in &entry.descriptor.info.config_fields {
            if !field.is_well_formed() || seen.contains(&field.key.as_str()) {
                return Err(RegistryError::MalformedField {
                    provider: name.to_string(),
                    key: field.key.clone(),
                });
            }
            seen.push(field.key.as_str());
        }
        Ok(())
    }

    fn insert_checked(entries: &mut Entries, entry: RegisteredProvider) -> Result<(), RegistryError> {
        Self::validate(&entry)?;
        let name = entry.name().to_string();
        if let Some(existing) = entries.get(&name) {
            return Err(
                if existing.descriptor.origin == ProviderOrigin::Builtin
                    && entry.descriptor.is_plugin()
                {
                    RegistryError::BuiltinCollision(name)
                } else {
                    RegistryError::Duplicate(name)
                },
            );
        }
        entries.insert(name, Arc::new(entry));
        Ok(())
    }

    /// Register a single provider. Names are never silently overwritten.
    pub fn register(&self, entry: RegisteredProvider) -> Result<(), RegistryError> {
        let name = entry.name().to_string();
        let origin = entry.descriptor.origin;
        self.update(|entries| Self::insert_checked(entries, entry))?;
        info!(provider = %name, origin = ?origin, "Registered provider");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<RegisteredProvider>, RegistryError> {
        let removed = self.update(|entries| {
            entries
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))
        })?;
        info!(provider = %name, "Unregistered provider");
        Ok(removed)
    }

    /// Replace every plugin-origin entry with `plugins` in one swap.
    ///
    /// Built-ins are carried over untouched. Plugins that fail validation or
    /// collide with an existing name are rejected individually.
    pub fn replace_plugins(&self, plugins: Vec<RegisteredProvider>) -> SwapReport {
        let mut report = SwapReport::default();
        let swapped = self.update(|entries| {
            let previous: Vec<String> = entries
                .values()
                .filter(|e| e.descriptor.is_plugin())
                .map(|e| e.name().to_string())
                .collect();
            entries.retain(|_, e| !e.descriptor.is_plugin());

            for plugin in plugins {
                let name = plugin.name().to_string();
                let mut plugin = plugin;
                plugin.descriptor.origin = ProviderOrigin::Plugin;
                match Self::insert_checked(entries, plugin) {
                    Ok(()) => report.registered.push(name),
                    Err(e) => {
                        warn!(plugin = %name, error = %e, "Rejected plugin provider");
                        report.rejected.push((name, e));
                    }
                }
            }

            report.removed = previous
                .into_iter()
                .filter(|name| !report.registered.contains(name))
                .collect();
            Ok(())
        });
        if let Err(e) = swapped {
            warn!(error = %e, "Plugin swap failed");
        }
        report.registered.sort();
        report.removed.sort();
        report
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredProvider>> {
        self.snapshot().get(name).cloned()
    }

    /// Every entry sorted by priority, then name.
    pub fn list(&self) -> Vec<Arc<RegisteredProvider>> {
        let mut list: Vec<_> = self.snapshot().values().cloned().collect();
        sort_by_priority(&mut list);
        list
    }

    /// Change a provider's mutable settings (enabled, priority, modifier).
    pub fn update_descriptor(
        &self,
        name: &str,
        f: impl FnOnce(&mut ProviderDescriptor),
    ) -> Result<ProviderDescriptor, RegistryError> {
        self.update(|entries| {
            let current = entries
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            let mut descriptor = current.descriptor.clone();
            f(&mut descriptor);
            // Identity and declared metadata are fixed after registration.
            descriptor.info = current.descriptor.info.clone();
            descriptor.origin = current.descriptor.origin;
            let updated = RegisteredProvider::new(
                current.provider.clone(),
                descriptor.clone(),
                current.init.clone(),
            );
            entries.insert(name.to_string(), Arc::new(updated));
            Ok(descriptor)
        })
    }

    /// Split the current entries into dispatchable and skipped providers.
    ///
    /// Dispatchable = enabled, initialized, not auto-disabled and circuit not open.
    pub fn dispatch_plan(
        &self,
        health: &HealthMonitor,
        breakers: &CircuitBreakers,
        now: DateTime<Utc>,
    ) -> DispatchPlan {
        let mut plan = DispatchPlan::default();
        for entry in self.list() {
            let name = entry.name();
            let skip = if !entry.descriptor.enabled {
                Some(SkipReason::Disabled)
            } else if !entry.init.is_ready() {
                Some(SkipReason::NotConfigured)
            } else if health.is_auto_disabled(name, now) {
                Some(SkipReason::AutoDisabled)
            } else if breakers.get(name).is_blocking() {
                Some(SkipReason::CircuitOpen)
            } else {
                None
            };
            match skip {
                Some(reason) => {
                    debug!(provider = %name, reason = ?reason, "Skipping provider");
                    plan.skipped.push((name.to_string(), reason));
                }
                None => plan.dispatchable.push(entry),
            }
        }
        plan
    }

    /// Providers a search would dispatch to right now.
    pub fn dispatchable(
        &self,
        health: &HealthMonitor,
        breakers: &CircuitBreakers,
        now: DateTime<Utc>,
    ) -> Vec<Arc<RegisteredProvider>> {
        self.dispatch_plan(health, breakers, now).dispatchable
    }
}

fn sort_by_priority(list: &mut [Arc<RegisteredProvider>]) {
    list.sort_by(|a, b| {
        a.descriptor
            .priority
            .cmp(&b.descriptor.priority)
            .then_with(|| a.name().cmp(b.name()))
    });
}
