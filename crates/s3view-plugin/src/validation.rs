//! Pre-flight contract checks for plugin instances.

use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::traits::S3Plugin;

/// Checks the declarative half of the contract: non-empty name and version,
/// and at least one supported operation.
pub fn validate_declaration(plugin: &dyn S3Plugin) -> PluginResult<()> {
    let metadata = plugin.metadata();

    if metadata.name.trim().is_empty() {
        return Err(PluginError::ContractInvalid(
            "plugin name must not be empty".to_string(),
        ));
    }

    if metadata.version.trim().is_empty() {
        return Err(PluginError::ContractInvalid(format!(
            "plugin '{}' has an empty version",
            metadata.name
        )));
    }

    if plugin.supported_operations().is_empty() {
        return Err(PluginError::ContractInvalid(format!(
            "plugin '{}' supports no operations",
            metadata.name
        )));
    }

    Ok(())
}

/// Full pre-flight check: the declaration plus a dry `initialize(None)` and
/// `cleanup()` cycle, both of which must succeed.
pub async fn validate_plugin_interface(plugin: &dyn S3Plugin) -> PluginResult<()> {
    validate_declaration(plugin)?;

    let name = plugin.metadata().name;

    plugin.initialize(None).await.map_err(|e| {
        PluginError::ContractInvalid(format!("plugin '{name}' failed to initialize: {e}"))
    })?;

    plugin.cleanup().await.map_err(|e| {
        PluginError::ContractInvalid(format!("plugin '{name}' failed to clean up: {e}"))
    })?;

    debug!(plugin = %name, "Plugin interface validated");
    Ok(())
}
