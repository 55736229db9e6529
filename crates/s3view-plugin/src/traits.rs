//! Capability model: the base plugin contract plus the optional capabilities
//! a plugin may add.
//!
//! Optional capabilities are independent traits. A plugin advertises one by
//! overriding the matching `as_*` accessor on [`S3Plugin`]; the dispatcher
//! queries those accessors on every dispatch rather than caching them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::api::context::OperationContext;
use crate::error::PluginResult;
use crate::operation::{OperationArgs, OperationResult, Priority, S3Operation};

/// Descriptive metadata declared by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin name.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// Plugin description.
    #[serde(default)]
    pub description: String,
    /// Author or maintainer.
    #[serde(default)]
    pub author: String,
    /// License identifier.
    #[serde(default)]
    pub license: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form configuration.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl PluginMetadata {
    /// Creates metadata with only a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            license: String::new(),
            tags: Vec::new(),
            config: HashMap::new(),
        }
    }
}

/// A bidirectional byte stream, e.g. an object transfer body.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed [`ByteStream`].
pub type BoxByteStream = Box<dyn ByteStream>;

/// Base contract every plugin implements.
#[async_trait]
pub trait S3Plugin: Send + Sync + std::fmt::Debug {
    /// Returns plugin metadata.
    fn metadata(&self) -> PluginMetadata;

    /// Operations this plugin can take part in.
    fn supported_operations(&self) -> Vec<S3Operation>;

    /// Called once before the plugin is registered. `config` is the
    /// plugin's section from the runtime configuration, if any.
    async fn initialize(&self, config: Option<&serde_json::Value>) -> PluginResult<()>;

    /// Main execution stage.
    async fn execute(
        &self,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> PluginResult<OperationResult>;

    /// Called when the plugin is unloaded.
    async fn cleanup(&self) -> PluginResult<()>;

    /// Whether `operation` is in [`S3Plugin::supported_operations`].
    fn supports(&self, operation: S3Operation) -> bool {
        self.supported_operations().contains(&operation)
    }

    /// Argument rewriting before the main stage.
    fn as_pre_processor(&self) -> Option<&dyn PreProcessor> {
        None
    }

    /// Result rewriting after the main stage.
    fn as_post_processor(&self) -> Option<&dyn PostProcessor> {
        None
    }

    /// Transfer stream wrapping.
    fn as_stream_processor(&self) -> Option<&dyn StreamProcessor> {
        None
    }

    /// Bulk fast path for [`S3Operation::Batch`].
    fn as_batch_processor(&self) -> Option<&dyn BatchProcessor> {
        None
    }

    /// Query fast path for [`S3Operation::Select`].
    fn as_select_processor(&self) -> Option<&dyn SelectProcessor> {
        None
    }

    /// Explicit dispatch priority.
    fn as_prioritized(&self) -> Option<&dyn PrioritizedPlugin> {
        None
    }

    /// Per-call applicability predicate.
    fn as_conditional(&self) -> Option<&dyn ConditionalPlugin> {
        None
    }
}

/// Rewrites the argument map before the main stage.
#[async_trait]
pub trait PreProcessor: Send + Sync {
    /// Returns the arguments the next stage receives.
    async fn pre_process(
        &self,
        ctx: &OperationContext,
        args: OperationArgs,
    ) -> PluginResult<OperationArgs>;
}

/// Rewrites the result after the main stage.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Returns the result the next stage (or the caller) receives.
    async fn post_process(
        &self,
        ctx: &OperationContext,
        result: OperationResult,
    ) -> PluginResult<OperationResult>;
}

/// Wraps a transfer stream, e.g. for on-the-fly compression or encryption.
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    /// Returns the wrapped stream.
    async fn process_stream(
        &self,
        ctx: &OperationContext,
        stream: BoxByteStream,
    ) -> PluginResult<BoxByteStream>;
}

/// Handles a whole batch at once instead of per-item `execute`.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Processes `items` in one call.
    async fn process_batch(
        &self,
        ctx: &OperationContext,
        items: Vec<serde_json::Value>,
    ) -> PluginResult<OperationResult>;
}

/// Handles query-language operations.
#[async_trait]
pub trait SelectProcessor: Send + Sync {
    /// Runs `query`, producing output in `format`.
    async fn process_select(
        &self,
        ctx: &OperationContext,
        query: &str,
        format: &str,
    ) -> PluginResult<OperationResult>;
}

/// Declares an explicit dispatch priority.
pub trait PrioritizedPlugin: Send + Sync {
    /// Priority of this plugin. Higher runs earlier.
    fn priority(&self) -> Priority;
}

/// Runtime applicability predicate, evaluated on every dispatch.
pub trait ConditionalPlugin: Send + Sync {
    /// Whether the plugin takes part in this call.
    fn should_execute(&self, ctx: &OperationContext, args: &OperationArgs) -> bool;
}

/// Effective priority of `plugin`: its declared one, or [`Priority::MEDIUM`].
pub fn effective_priority(plugin: &dyn S3Plugin) -> Priority {
    plugin
        .as_prioritized()
        .map(|p| p.priority())
        .unwrap_or_default()
}
