//! Prelude for plugin authors.

pub use async_trait::async_trait;

pub use crate::api::context::{OperationContext, ProgressFn};
pub use crate::error::{PluginError, PluginResult};
pub use crate::operation::{OperationArgs, OperationResult, Priority, S3Operation};
pub use crate::traits::{
    BatchProcessor, BoxByteStream, ConditionalPlugin, PluginMetadata, PostProcessor,
    PreProcessor, PrioritizedPlugin, S3Plugin, SelectProcessor, StreamProcessor,
};

pub use crate::{operation_args, plugin_metadata};
