//! Plugin discovery.
//!
//! Plugins are out-of-process providers described by `*.toml` manifests in a
//! directory. Each manifest is loaded in isolation: a bad file is reported and
//! skipped, never fatal to the scan.

mod manifest;
mod remote;
mod watcher;

pub use manifest::PluginManifest;
pub use remote::RemoteProvider;
pub use watcher::PluginWatcher;

use std::collections::HashSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("Failed to read plugin directory {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid manifest {source_name}: {message}")]
    Manifest { source_name: String, message: String },

    #[error("Plugin {source_name} rejected: {message}")]
    Invalid { source_name: String, message: String },

    #[error("Failed to watch plugin directory: {0}")]
    Watch(String),
}

/// A plugin file that did not make it into the registry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PluginRejection {
    /// Manifest file name, or plugin name for registry rejections.
    pub source: String,
    pub reason: String,
}

/// Outcome of a plugin reload.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<PluginRejection>,
}

impl ReloadReport {
    pub fn metric_label(&self) -> &'static str {
        match (self.loaded.is_empty(), self.rejected.is_empty()) {
            (_, true) => "ok",
            (false, false) => "partial",
            (true, false) => "failed",
        }
    }
}

/// Valid manifests plus the files that were rejected.
#[derive(Debug, Default)]
pub struct Discovery {
    pub manifests: Vec<PluginManifest>,
    pub rejected: Vec<PluginRejection>,
}

/// Scan `dir` for `*.toml` manifests in file-name order.
///
/// A later manifest reusing a name already seen in the directory is rejected.
/// A missing directory yields an empty discovery.
pub fn discover(dir: &Path) -> Result<Discovery, PluginLoadError> {
    let io_error = |e: std::io::Error| PluginLoadError::Io {
        path: dir.display().to_string(),
        message: e.to_string(),
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            warn!(directory = %dir.display(), "Plugin directory does not exist");
            return Ok(Discovery::default());
        }
        Err(e) => return Err(io_error(e)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_error)?.path();
        let is_manifest = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_manifest {
            paths.push(path);
        }
    }
    paths.sort();

    let mut discovery = Discovery::default();
    let mut names = HashSet::new();
    for path in paths {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let loaded = std::fs::read_to_string(&path)
            .map_err(|e| PluginLoadError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })
            .and_then(|content| PluginManifest::parse(&file, &content));

        match loaded {
            Ok(manifest) if !names.insert(manifest.name.trim().to_string()) => {
                warn!(file = %file, plugin = %manifest.name, "Duplicate plugin name");
                discovery.rejected.push(PluginRejection {
                    source: file,
                    reason: format!("duplicate plugin name '{}'", manifest.name.trim()),
                });
            }
            Ok(manifest) => {
                debug!(file = %file, plugin = %manifest.name, "Discovered plugin");
                discovery.manifests.push(manifest);
            }
            Err(e) => {
                warn!(file = %file, error = %e, "Skipping plugin");
                discovery.rejected.push(PluginRejection {
                    source: file,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(discovery)
}
