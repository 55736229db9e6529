//! Plugin runtime configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Symbol exporting the plugin metadata accessor.
pub const METADATA_SYMBOL: &str = "s3view_plugin_metadata";

/// Symbol exporting the plugin instance factory.
pub const FACTORY_SYMBOL: &str = "s3view_plugin_create";

/// Plugin loader configuration.
///
/// Every field is optional in the TOML source; missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directories scanned (recursively) for plugin modules. A leading `~`
    /// is expanded to the current user's home directory.
    #[serde(default = "default_directories")]
    pub directories: Vec<String>,
    /// Whether the hot-reload watcher runs after a scan.
    #[serde(default = "default_true")]
    pub auto_reload: bool,
    /// Watcher poll interval in milliseconds.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_ms: u64,
    /// Accepted module file extensions, with or without the leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Symbols that must resolve in a module before it is instantiated.
    #[serde(default = "default_required_symbols")]
    pub required_symbols: Vec<String>,
    /// Maximum number of simultaneously loaded plugins; 0 disables the limit.
    #[serde(default = "default_max_plugins")]
    pub max_plugins: usize,
    /// Deadline in seconds for instantiating and initializing one plugin;
    /// 0 disables the deadline.
    #[serde(default = "default_load_timeout")]
    pub load_timeout_seconds: u64,
    /// Largest accepted module size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Only accept modules that resolve inside a configured directory.
    #[serde(default)]
    pub sandbox_mode: bool,
    /// Require a detached signature next to each module.
    #[serde(default)]
    pub verify_signatures: bool,
    /// Per-plugin configuration, keyed by plugin name, passed to `initialize`.
    #[serde(default)]
    pub plugin_config: HashMap<String, serde_json::Value>,
}

impl PluginConfig {
    /// Watcher poll interval.
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms.max(1))
    }

    /// Per-file instantiate + initialize deadline, `None` when disabled.
    pub fn load_timeout(&self) -> Option<Duration> {
        (self.load_timeout_seconds > 0).then(|| Duration::from_secs(self.load_timeout_seconds))
    }

    /// Configured directories with `~` expanded.
    pub fn expanded_directories(&self) -> Vec<PathBuf> {
        self.directories.iter().map(|d| expand_home(d)).collect()
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directories: default_directories(),
            auto_reload: default_true(),
            reload_interval_ms: default_reload_interval(),
            allowed_extensions: default_allowed_extensions(),
            required_symbols: default_required_symbols(),
            max_plugins: default_max_plugins(),
            load_timeout_seconds: default_load_timeout(),
            max_file_size_bytes: default_max_file_size(),
            sandbox_mode: false,
            verify_signatures: false,
            plugin_config: HashMap::new(),
        }
    }
}

/// Expands a leading `~` (alone or followed by a separator) to the home
/// directory. Paths without one, or hosts without a home, are returned as-is.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
            .or_else(|| path.strip_prefix("~\\"))
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn default_directories() -> Vec<String> {
    vec!["~/.s3view/plugins".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_reload_interval() -> u64 {
    5_000
}

fn default_allowed_extensions() -> Vec<String> {
    let ext = if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    };
    vec![ext.to_string()]
}

fn default_required_symbols() -> Vec<String> {
    vec![METADATA_SYMBOL.to_string(), FACTORY_SYMBOL.to_string()]
}

fn default_max_plugins() -> usize {
    100
}

fn default_load_timeout() -> u64 {
    30
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}
