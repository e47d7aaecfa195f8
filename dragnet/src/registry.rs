use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::plugin::Plugin;

/// Directory of plugin instances keyed by (stage name, plugin name).
///
/// Registration happens once at pipeline assembly; lookups happen
/// continuously from concurrent fan-out units, so the map is a
/// read-optimized concurrent map. A registry instance is built explicitly
/// and injected into the pipeline, its lifetime bound to the pipeline's.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<(String, String), Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` under `stage`. A plugin registered twice under the
    /// same (stage, name) pair replaces the earlier instance.
    pub fn register(&self, stage: &str, plugin: Arc<dyn Plugin>) {
        debug!(stage, plugin = plugin.name(), "registering plugin");
        self.plugins
            .insert((stage.to_string(), plugin.name().to_string()), plugin);
    }

    pub fn lookup(&self, stage: &str, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .get(&(stage.to_string(), name.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Best-effort provisioning sweep over every registered plugin.
    /// Failures are logged and skipped; a plugin that failed to install may
    /// later fail to execute, which the pipeline also tolerates.
    pub async fn install_all(&self) {
        join_all(self.snapshot().into_iter().map(|(stage, plugin)| async move {
            if let Err(e) = plugin.install().await {
                warn!(stage = %stage, plugin = plugin.name(), error = %e, "plugin install failed");
            }
        }))
        .await;
    }

    /// Health-check every registered plugin, returning the number that
    /// failed. Failures are logged, never fatal.
    pub async fn check_all(&self) -> usize {
        let results = join_all(self.snapshot().into_iter().map(|(stage, plugin)| async move {
            match plugin.check().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(stage = %stage, plugin = plugin.name(), error = %e, "plugin check failed");
                    false
                }
            }
        }))
        .await;
        results.into_iter().filter(|ok| !ok).count()
    }

    // Detach entries from the map before any await point; dashmap shard
    // guards must not be held across suspension.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.plugins
            .iter()
            .map(|entry| (entry.key().0.clone(), Arc::clone(entry.value())))
            .collect()
    }
}
