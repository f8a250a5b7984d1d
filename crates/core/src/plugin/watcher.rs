//! Hot reload: watch the plugin directory and trigger debounced re-scans.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::PluginLoadError;

/// Running directory watch. Dropping it stops the watch and the reload task.
pub struct PluginWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl PluginWatcher {
    /// Watch `dir` and call `on_change` once per burst of manifest changes,
    /// after `debounce` of quiet.
    pub fn spawn<F, Fut>(dir: &Path, debounce: Duration, on_change: F) -> Result<Self, PluginLoadError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) if is_manifest_event(&event) => {
                    debug!(paths = ?event.paths, "Plugin manifest changed");
                    // The receiver is gone only after the watcher stopped.
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Plugin watch error"),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| PluginLoadError::Watch(e.to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| PluginLoadError::Watch(format!("{}: {}", dir.display(), e)))?;

        info!(directory = %dir.display(), debounce_ms = debounce.as_millis() as u64, "Watching plugin directory");
        let task = tokio::spawn(debounce_loop(rx, debounce, on_change));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        info!("Stopping plugin watcher");
        drop(self);
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_manifest_event(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml")))
}

/// Coalesce change signals: after the first signal, wait until `quiet` passes
/// with no new signal, then fire once.
pub(crate) async fn debounce_loop<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<()>,
    quiet: Duration,
    mut on_change: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        let mut closed = false;
        loop {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }
        on_change().await;
        if closed {
            break;
        }
    }
    debug!("Plugin watch loop finished");
}
