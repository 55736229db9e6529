//! Dynamic plugin loader — discovery, verification, loading, hot reload,
//! and unloading of plugin modules.
//!
//! One mutex guards the tracked-file map, the watcher entries, and the
//! directory list, and is held for the whole of a load, reload, or unload.
//! Registry locks are only ever taken while this mutex is held (never the
//! other way round), so reloads and unloads cannot invert lock order.
//!
//! A module is unmapped when the last `Arc<PluginInstance>` that references
//! it is dropped. The registry, the loader record, and every in-flight
//! dispatch each hold one, so unloading removes a plugin from future
//! dispatches at once while calls already running finish against mapped
//! code.

pub mod module;
mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use s3view_core::config::PluginConfig;
use s3view_core::config::plugin::expand_home;

use crate::error::{PluginError, PluginResult, Rejection};
use crate::registry::PluginRegistry;
use crate::security::SecurityGate;
use crate::traits::PluginMetadata;
use crate::validation::validate_declaration;

use self::module::{ModuleLoader, NativeModuleLoader, PluginInstance, PluginModule};
use self::watcher::WatcherHandle;

/// What a single-file load did.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A new plugin was loaded and registered.
    Loaded(PluginMetadata),
    /// A tracked plugin was replaced by a fresh instance.
    Reloaded(PluginMetadata),
    /// The file is tracked and has not changed; nothing was done.
    Unchanged,
}

/// Read-only snapshot of a loaded plugin.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPlugin {
    /// Module file.
    pub path: PathBuf,
    /// Declared metadata.
    pub metadata: PluginMetadata,
    /// When the plugin was (re)loaded.
    pub loaded_at: DateTime<Utc>,
    /// File modification time observed at load.
    pub last_modified: DateTime<Utc>,
}

/// Per-plugin line in [`PluginStatistics`].
#[derive(Debug, Clone, Serialize)]
pub struct PluginStat {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Module file.
    pub path: PathBuf,
    /// When the plugin was (re)loaded.
    pub loaded_at: DateTime<Utc>,
    /// File modification time observed at load.
    pub last_modified: DateTime<Utc>,
}

/// Loader statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatistics {
    /// Number of loaded plugins.
    pub total_plugins: usize,
    /// Watched plugin directories.
    pub plugin_directories: Vec<PathBuf>,
    /// Whether the hot-reload watcher is enabled.
    pub auto_reload_enabled: bool,
    /// Loaded plugins, ordered by path.
    pub loaded_plugins: Vec<PluginStat>,
}

/// Loader state for one tracked file.
#[derive(Debug)]
struct LoadedPluginRecord {
    /// Declared metadata.
    metadata: PluginMetadata,
    /// When the plugin was (re)loaded.
    loaded_at: DateTime<Utc>,
    /// File modification time observed at load.
    modified: SystemTime,
    /// The registered instance.
    instance: Arc<PluginInstance>,
}

/// Watcher bookkeeping for one tracked file. Deactivated, not removed, on
/// unload so a stale tick cannot bring the plugin back.
#[derive(Debug, Clone)]
struct WatcherEntry {
    /// Modification time at the last (re)load.
    modified: SystemTime,
    /// Whether the watcher still tracks this file.
    active: bool,
}

/// Everything guarded by the loader mutex.
#[derive(Debug, Default)]
struct LoaderState {
    /// Module file → record.
    records: HashMap<PathBuf, LoadedPluginRecord>,
    /// Module file → watcher entry.
    watchers: HashMap<PathBuf, WatcherEntry>,
    /// Plugin directories, home-expanded.
    directories: Vec<PathBuf>,
}

/// Whether a load may be skipped when the file has not changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// Skip tracked files whose modification time has not advanced.
    IfChanged,
    /// Always reload tracked files.
    Force,
}

/// Loads plugin modules and keeps the registry in sync with them.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct PluginLoader {
    inner: Arc<LoaderInner>,
}

#[derive(Debug)]
struct LoaderInner {
    /// Loader configuration.
    config: PluginConfig,
    /// Registry receiving loaded instances.
    registry: Arc<PluginRegistry>,
    /// Pre-load checks.
    gate: SecurityGate,
    /// OS-level module loading.
    modules: Arc<dyn ModuleLoader>,
    /// Tracked files, watcher entries, directories.
    state: Mutex<LoaderState>,
    /// Whether the watcher should run.
    auto_reload: AtomicBool,
    /// Running watcher task, if any.
    watcher: Mutex<Option<WatcherHandle>>,
}

impl PluginLoader {
    /// Creates a loader using native shared-library loading.
    pub fn new(config: PluginConfig, registry: Arc<PluginRegistry>) -> Self {
        let gate = SecurityGate::from_config(&config);
        Self::with_parts(config, registry, Arc::new(NativeModuleLoader::new()), gate)
    }

    /// Creates a loader with an explicit module loader and verification gate.
    pub fn with_parts(
        config: PluginConfig,
        registry: Arc<PluginRegistry>,
        modules: Arc<dyn ModuleLoader>,
        gate: SecurityGate,
    ) -> Self {
        let state = LoaderState {
            directories: config.expanded_directories(),
            ..LoaderState::default()
        };

        Self {
            inner: Arc::new(LoaderInner {
                auto_reload: AtomicBool::new(config.auto_reload),
                config,
                registry,
                gate,
                modules,
                state: Mutex::new(state),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// The registry this loader feeds.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    /// Scans every plugin directory recursively and loads each file that
    /// passes verification. Per-file failures are logged and skipped.
    ///
    /// Returns the number of plugins loaded or reloaded. Starts the
    /// hot-reload watcher afterwards when auto-reload is enabled; the
    /// watcher lives until `scope` is cancelled or [`PluginLoader::shutdown`].
    pub async fn load_plugins(&self, scope: &CancellationToken) -> PluginResult<usize> {
        let directories = self.inner.state.lock().await.directories.clone();

        let mut loaded = 0;
        for dir in &directories {
            loaded += self.inner.scan_directory(scope, dir).await?;
        }

        info!(
            loaded,
            directories = directories.len(),
            "Plugin scan complete"
        );

        if self.inner.auto_reload.load(Ordering::SeqCst) {
            self.inner.start_watcher(scope).await;
        }

        Ok(loaded)
    }

    /// Loads a single module file. A tracked file whose modification time
    /// has not advanced is left alone ([`LoadOutcome::Unchanged`]).
    pub async fn load_file(
        &self,
        scope: &CancellationToken,
        path: impl AsRef<Path>,
    ) -> PluginResult<LoadOutcome> {
        self.inner
            .load_file(scope, path.as_ref(), LoadMode::IfChanged)
            .await
    }

    /// Replaces a plugin with a fresh instance from its file, whether or
    /// not the file changed.
    pub async fn reload_plugin(
        &self,
        scope: &CancellationToken,
        path: impl AsRef<Path>,
    ) -> PluginResult<LoadOutcome> {
        self.inner
            .load_file(scope, path.as_ref(), LoadMode::Force)
            .await
    }

    /// Reloads a tracked plugin if its file changed since it was loaded.
    pub async fn reload_file(
        &self,
        scope: &CancellationToken,
        path: impl AsRef<Path>,
    ) -> PluginResult<LoadOutcome> {
        let path = path.as_ref();
        let mut state = self.inner.state.lock().await;
        if !state.records.contains_key(path) {
            return Err(not_loaded(path));
        }
        self.inner
            .load_locked(&mut state, scope, path, LoadMode::IfChanged)
            .await
    }

    /// Unloads the plugin loaded from `path`.
    pub async fn unload_file(&self, path: impl AsRef<Path>) -> PluginResult<PluginMetadata> {
        let path = path.as_ref();
        let mut state = self.inner.state.lock().await;
        self.inner
            .unload_locked(&mut state, path)
            .await
            .map(|record| record.metadata)
            .ok_or_else(|| not_loaded(path))
    }

    /// Unloads every plugin.
    pub async fn unload_all_plugins(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let mut paths: Vec<PathBuf> = state.records.keys().cloned().collect();
        paths.sort();

        let mut unloaded = 0;
        for path in paths {
            if self.inner.unload_locked(&mut state, &path).await.is_some() {
                unloaded += 1;
            }
        }

        info!(unloaded, "All plugins unloaded");
        unloaded
    }

    /// Adds a directory to the watched set and scans it.
    pub async fn add_plugin_directory(
        &self,
        scope: &CancellationToken,
        dir: &str,
    ) -> PluginResult<usize> {
        let dir = expand_home(dir);
        {
            let mut state = self.inner.state.lock().await;
            if state.directories.contains(&dir) {
                debug!(dir = %dir.display(), "Plugin directory already watched");
            } else {
                state.directories.push(dir.clone());
                info!(dir = %dir.display(), "Plugin directory added");
            }
        }

        self.inner.scan_directory(scope, &dir).await
    }

    /// Removes a directory from the watched set and unloads every plugin
    /// loaded from under it. Returns the number of plugins unloaded.
    pub async fn remove_plugin_directory(&self, dir: &str) -> usize {
        let dir = expand_home(dir);
        let mut state = self.inner.state.lock().await;
        state.directories.retain(|d| *d != dir);

        let mut under: Vec<PathBuf> = state
            .records
            .keys()
            .filter(|path| path.starts_with(&dir))
            .cloned()
            .collect();
        under.sort();

        let mut unloaded = 0;
        for path in under {
            if self.inner.unload_locked(&mut state, &path).await.is_some() {
                unloaded += 1;
            }
        }

        info!(dir = %dir.display(), unloaded, "Plugin directory removed");
        unloaded
    }

    /// Snapshot of all loaded plugins, ordered by path.
    pub async fn get_loaded_plugins(&self) -> Vec<LoadedPlugin> {
        let state = self.inner.state.lock().await;
        let mut plugins: Vec<LoadedPlugin> = state
            .records
            .iter()
            .map(|(path, record)| LoadedPlugin {
                path: path.clone(),
                metadata: record.metadata.clone(),
                loaded_at: record.loaded_at,
                last_modified: DateTime::<Utc>::from(record.modified),
            })
            .collect();
        plugins.sort_by(|a, b| a.path.cmp(&b.path));
        plugins
    }

    /// Loader statistics.
    pub async fn get_plugin_statistics(&self) -> PluginStatistics {
        let loaded = self.get_loaded_plugins().await;
        let directories = self.inner.state.lock().await.directories.clone();

        PluginStatistics {
            total_plugins: loaded.len(),
            plugin_directories: directories,
            auto_reload_enabled: self.inner.auto_reload.load(Ordering::SeqCst),
            loaded_plugins: loaded
                .into_iter()
                .map(|p| PluginStat {
                    name: p.metadata.name,
                    version: p.metadata.version,
                    path: p.path,
                    loaded_at: p.loaded_at,
                    last_modified: p.last_modified,
                })
                .collect(),
        }
    }

    /// Enables or disables the hot-reload watcher.
    pub async fn set_auto_reload(&self, scope: &CancellationToken, enabled: bool) {
        self.inner.auto_reload.store(enabled, Ordering::SeqCst);
        if enabled {
            self.inner.start_watcher(scope).await;
        } else {
            self.inner.stop_watcher().await;
        }
        info!(enabled, "Auto-reload updated");
    }

    /// Stops the watcher, waits for it to exit, then unloads every plugin.
    pub async fn shutdown(&self) {
        self.inner.stop_watcher().await;
        self.unload_all_plugins().await;
    }
}

impl LoaderInner {
    /// Loads every file under `dir`; returns how many were (re)loaded.
    async fn scan_directory(&self, scope: &CancellationToken, dir: &Path) -> PluginResult<usize> {
        let files = match collect_files(dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Plugin directory does not exist, skipping");
                return Ok(0);
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read plugin directory");
                return Ok(0);
            }
        };

        let mut loaded = 0;
        for file in files {
            if scope.is_cancelled() {
                return Err(PluginError::Cancelled);
            }

            match self.load_file(scope, &file, LoadMode::IfChanged).await {
                Ok(LoadOutcome::Loaded(_)) | Ok(LoadOutcome::Reloaded(_)) => loaded += 1,
                Ok(LoadOutcome::Unchanged) => {}
                Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
                Err(PluginError::Rejected {
                    reason: Rejection::ExtensionNotAllowed(_),
                    ..
                }) => {
                    debug!(path = %file.display(), "Skipping non-plugin file");
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Skipping plugin file");
                }
            }
        }

        Ok(loaded)
    }

    async fn load_file(
        &self,
        scope: &CancellationToken,
        path: &Path,
        mode: LoadMode,
    ) -> PluginResult<LoadOutcome> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, scope, path, mode).await
    }

    /// The single-file load path. Caller holds the state lock.
    ///
    /// Cancellation and the load timeout are only observed before
    /// registration starts; registration and record bookkeeping then run
    /// to completion, so an instance is either fully registered or not at all.
    ///
    /// A watched file stays watched when its load fails, with the failed
    /// modification time recorded, so the next write is retried.
    async fn load_locked(
        &self,
        state: &mut LoaderState,
        scope: &CancellationToken,
        path: &Path,
        mode: LoadMode,
    ) -> PluginResult<LoadOutcome> {
        self.gate.verify(path, &state.directories).await?;

        let modified = tokio::fs::metadata(path).await?.modified()?;
        let previous = state.records.get(path).map(|record| record.modified);

        if let Some(previous) = previous {
            if mode == LoadMode::IfChanged && modified <= previous {
                debug!(path = %path.display(), "Plugin unchanged, skipping");
                return Ok(LoadOutcome::Unchanged);
            }
        }

        let replacing = previous.is_some();
        let max = self.config.max_plugins;
        if !replacing && max > 0 && state.records.len() >= max {
            return Err(PluginError::CapacityExceeded { max });
        }

        let watched = is_watched(state, path);
        if replacing {
            self.unload_locked(state, path).await;
        }

        let metadata = match self.activate(state, scope, path, modified).await {
            Ok(metadata) => metadata,
            Err(e) => {
                if watched {
                    state.watchers.insert(
                        path.to_path_buf(),
                        WatcherEntry {
                            modified,
                            active: true,
                        },
                    );
                }
                return Err(e);
            }
        };

        info!(
            plugin = %metadata.name,
            version = %metadata.version,
            path = %path.display(),
            reloaded = replacing,
            "Plugin loaded"
        );

        Ok(if replacing {
            LoadOutcome::Reloaded(metadata)
        } else {
            LoadOutcome::Loaded(metadata)
        })
    }

    /// Opens, instantiates, and registers the module at `path`, then
    /// records it. Caller holds the state lock.
    async fn activate(
        &self,
        state: &mut LoaderState,
        scope: &CancellationToken,
        path: &Path,
        modified: SystemTime,
    ) -> PluginResult<PluginMetadata> {
        let module = self.open_module(scope, path).await?;

        let declared = module.metadata()?;
        if let Some((owner, _)) = state
            .records
            .iter()
            .find(|(other, record)| other.as_path() != path && record.metadata.name == declared.name)
        {
            return Err(PluginError::NameConflict {
                name: declared.name,
                path: owner.clone(),
            });
        }

        let plugin_config = self.config.plugin_config.get(&declared.name).cloned();
        let instantiate = instantiate(path.to_path_buf(), module, plugin_config);

        let instance = match self.config.load_timeout() {
            Some(timeout) => tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(PluginError::Cancelled),
                result = tokio::time::timeout(timeout, instantiate) => {
                    result.map_err(|_| PluginError::Timeout {
                        path: path.to_path_buf(),
                        after: timeout,
                    })??
                }
            },
            None => tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(PluginError::Cancelled),
                result = instantiate => result?,
            },
        };

        let metadata = instance.metadata();
        if metadata.name != declared.name {
            return Err(PluginError::load_failed(
                path,
                format!(
                    "instance name '{}' does not match declared name '{}'",
                    metadata.name, declared.name
                ),
            ));
        }

        let instance = Arc::new(instance);
        self.registry.register(instance.clone()).await?;

        state.records.insert(
            path.to_path_buf(),
            LoadedPluginRecord {
                metadata: metadata.clone(),
                loaded_at: Utc::now(),
                modified,
                instance,
            },
        );
        state.watchers.insert(
            path.to_path_buf(),
            WatcherEntry {
                modified,
                active: true,
            },
        );

        Ok(metadata)
    }

    /// OS-level load on the blocking pool. Not subject to the load timeout;
    /// a cancelled scope abandons the result.
    async fn open_module(
        &self,
        scope: &CancellationToken,
        path: &Path,
    ) -> PluginResult<Arc<dyn PluginModule>> {
        let modules = self.modules.clone();
        let symbols = self.config.required_symbols.clone();
        let file = path.to_path_buf();
        let open = tokio::task::spawn_blocking(move || modules.open(&file, &symbols));

        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(PluginError::Cancelled),
            joined = open => joined.map_err(|e| {
                PluginError::load_failed(path, format!("module load task failed: {e}"))
            })?,
        }
    }

    /// Removes the record for `path`, deactivates its watcher entry, and
    /// unregisters and cleans up its instance. Caller holds the state lock.
    async fn unload_locked(
        &self,
        state: &mut LoaderState,
        path: &Path,
    ) -> Option<LoadedPluginRecord> {
        let record = state.records.remove(path)?;
        if let Some(entry) = state.watchers.get_mut(path) {
            entry.active = false;
        }

        let name = &record.metadata.name;
        if let Err(e) = self.registry.unregister(name).await {
            warn!(plugin = %name, error = %e, "Registry unregistration failed during unload");
        }

        if let Err(e) = record.instance.cleanup().await {
            warn!(plugin = %name, error = %e, "Plugin cleanup returned error");
        }

        info!(plugin = %name, path = %path.display(), "Plugin unloaded");
        Some(record)
    }

    /// Watcher: unload `path` if it is still actively watched.
    async fn unload_if_watched(&self, path: &Path) {
        let mut state = self.state.lock().await;
        if !is_watched(&state, path) {
            return;
        }
        info!(path = %path.display(), "Plugin file removed");
        self.unload_locked(&mut state, path).await;
    }

    /// Watcher: reload `path` if it is still actively watched.
    async fn reload_if_watched(&self, scope: &CancellationToken, path: &Path) -> PluginResult<()> {
        let mut state = self.state.lock().await;
        if !is_watched(&state, path) {
            return Ok(());
        }
        match self.load_locked(&mut state, scope, path, LoadMode::IfChanged).await? {
            LoadOutcome::Reloaded(metadata) | LoadOutcome::Loaded(metadata) => {
                info!(plugin = %metadata.name, path = %path.display(), "Plugin hot-reloaded");
            }
            LoadOutcome::Unchanged => {}
        }
        Ok(())
    }

    /// Paths and modification times of actively watched files.
    async fn watched_files(&self) -> Vec<(PathBuf, SystemTime)> {
        let state = self.state.lock().await;
        let mut files: Vec<(PathBuf, SystemTime)> = state
            .watchers
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(path, entry)| (path.clone(), entry.modified))
            .collect();
        files.sort();
        files
    }
}

fn not_loaded(path: &Path) -> PluginError {
    PluginError::NotFound(format!("no plugin loaded from '{}'", path.display()))
}

fn is_watched(state: &LoaderState, path: &Path) -> bool {
    state
        .watchers
        .get(path)
        .map(|entry| entry.active)
        .unwrap_or(false)
}

/// Instantiates a plugin from `module` and initializes it. Bounded by the
/// load timeout in the caller.
async fn instantiate(
    path: PathBuf,
    module: Arc<dyn PluginModule>,
    config: Option<serde_json::Value>,
) -> PluginResult<PluginInstance> {
    let instance = tokio::task::spawn_blocking(move || PluginInstance::from_module(module))
        .await
        .map_err(|e| PluginError::load_failed(&path, format!("plugin factory failed: {e}")))??;

    validate_declaration(instance.plugin())?;

    instance
        .initialize(config.as_ref())
        .await
        .map_err(|e| PluginError::load_failed(&path, format!("initialize failed: {e}")))?;

    Ok(instance)
}

/// All regular files and symlinks under `dir`, recursively, sorted.
async fn collect_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    let mut root = true;

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if root => return Err(e),
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "Failed to read plugin subdirectory");
                continue;
            }
        };
        root = false;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
