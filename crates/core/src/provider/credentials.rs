//! Per-provider credential resolution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::store::{provider_key, ConfigStore, StoreError};

use super::ProviderInfo;

/// Resolved credential values for one provider, keyed by config field key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Required fields of `info` that have no value.
    pub fn missing_required(&self, info: &ProviderInfo) -> Vec<String> {
        info.config_fields
            .iter()
            .filter(|f| f.required && self.get(&f.key).is_none())
            .map(|f| f.key.clone())
            .collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// Resolve the declared config fields of a provider.
///
/// Order: stored override > config file value. Resolved once per provider
/// initialization.
pub fn resolve_credentials(
    info: &ProviderInfo,
    file_values: &HashMap<String, String>,
    store: &dyn ConfigStore,
) -> Result<Credentials, StoreError> {
    let mut credentials = Credentials::new();
    for field in &info.config_fields {
        let stored = store.get(&provider_key(&info.name, &field.key))?;
        let value = stored
            .filter(|v| !v.trim().is_empty())
            .or_else(|| file_values.get(&field.key).cloned());
        if let Some(value) = value {
            credentials.values.insert(field.key.clone(), value);
        }
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ConfigField, FieldType};
    use crate::store::MemoryConfigStore;

    fn info() -> ProviderInfo {
        let mut info = ProviderInfo::new("demo");
        info.config_fields = vec![
            ConfigField::new("api_key", "API key", FieldType::Secret, true),
            ConfigField::new("username", "Username", FieldType::String, false),
        ];
        info
    }

    #[test]
    fn test_store_overrides_file() {
        let store = MemoryConfigStore::new();
        store.set("provider.demo.api_key", "from-store").unwrap();
        let file: HashMap<String, String> =
            [("api_key".to_string(), "from-file".to_string())].into();

        let creds = resolve_credentials(&info(), &file, &store).unwrap();
        assert_eq!(creds.get("api_key"), Some("from-store"));
        assert!(creds.missing_required(&info()).is_empty());
    }

    #[test]
    fn test_file_value_used_when_store_empty() {
        let store = MemoryConfigStore::new();
        store.set("provider.demo.api_key", "  ").unwrap();
        let file: HashMap<String, String> =
            [("api_key".to_string(), "from-file".to_string())].into();

        let creds = resolve_credentials(&info(), &file, &store).unwrap();
        assert_eq!(creds.get("api_key"), Some("from-file"));
    }

    #[test]
    fn test_missing_required_reported() {
        let store = MemoryConfigStore::new();
        let creds = resolve_credentials(&info(), &HashMap::new(), &store).unwrap();
        assert_eq!(creds.missing_required(&info()), vec!["api_key".to_string()]);
    }

    #[test]
    fn test_debug_redacts_values() {
        let creds = Credentials::new().with("api_key", "secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("api_key"));
        assert!(!debug.contains("secret"));
    }
}
