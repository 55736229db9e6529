//! Plugin registry — the set of active, dispatchable plugin instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{PluginError, PluginResult};
use crate::ffi::abi::PluginBox;
use crate::loader::module::PluginInstance;
use crate::traits::PluginMetadata;
use crate::validation::validate_declaration;

/// Entry in the registry.
#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    /// Name the instance was registered under.
    pub(crate) name: String,
    /// The instance.
    pub(crate) instance: Arc<PluginInstance>,
    /// Registration sequence number; breaks priority ties.
    pub(crate) seq: u64,
}

/// Registry of active plugins keyed by metadata name.
///
/// Dispatch takes the read lock only long enough to snapshot the entries,
/// so plugin code never runs under the lock.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Plugin name → entry.
    plugins: RwLock<HashMap<String, RegistryEntry>>,
    /// Next registration sequence number.
    next_seq: AtomicU64,
}

impl PluginRegistry {
    /// Creates a new empty plugin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance under its metadata name. An existing entry
    /// with the same name is replaced and returned.
    pub async fn register(
        &self,
        instance: Arc<PluginInstance>,
    ) -> PluginResult<Option<Arc<PluginInstance>>> {
        validate_declaration(instance.plugin())?;

        let metadata = instance.metadata();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let replaced = {
            let mut plugins = self.plugins.write().await;
            let entry = RegistryEntry {
                name: metadata.name.clone(),
                instance,
                seq,
            };
            plugins.insert(metadata.name.clone(), entry)
        };

        info!(
            plugin = %metadata.name,
            version = %metadata.version,
            replaced = replaced.is_some(),
            "Plugin registered"
        );

        Ok(replaced.map(|entry| entry.instance))
    }

    /// Registers a compiled-in plugin.
    pub async fn register_plugin(
        &self,
        plugin: PluginBox,
    ) -> PluginResult<Option<Arc<PluginInstance>>> {
        self.register(Arc::new(PluginInstance::new(plugin))).await
    }

    /// Unregisters a plugin by name.
    pub async fn unregister(&self, name: &str) -> PluginResult<Arc<PluginInstance>> {
        let entry = {
            let mut plugins = self.plugins.write().await;
            plugins.remove(name)
        }
        .ok_or_else(|| PluginError::NotFound(format!("plugin '{name}' is not registered")))?;

        info!(plugin = %name, "Plugin unregistered");
        Ok(entry.instance)
    }

    /// Gets a plugin by name.
    pub async fn get(&self, name: &str) -> Option<Arc<PluginInstance>> {
        let plugins = self.plugins.read().await;
        plugins.get(name).map(|entry| entry.instance.clone())
    }

    /// Checks whether a plugin is registered.
    pub async fn contains(&self, name: &str) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(name)
    }

    /// Returns the number of registered plugins.
    pub async fn count(&self) -> usize {
        let plugins = self.plugins.read().await;
        plugins.len()
    }

    /// Lists metadata of all registered plugins in registration order.
    pub async fn list(&self) -> Vec<PluginMetadata> {
        self.snapshot()
            .await
            .into_iter()
            .map(|entry| entry.instance.metadata())
            .collect()
    }

    /// Snapshot of all entries in registration order.
    pub(crate) async fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = {
            let plugins = self.plugins.read().await;
            plugins.values().cloned().collect()
        };
        entries.sort_by_key(|entry| entry.seq);
        entries
    }
}
