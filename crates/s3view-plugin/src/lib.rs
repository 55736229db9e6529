//! # s3view-plugin
//!
//! Plugin capability runtime for s3view. Provides:
//!
//! - A base plugin contract plus optional capabilities (pre/post processing,
//!   stream wrapping, batch, select, priority, conditional execution)
//! - A verification gate run on every candidate module file
//! - Dynamic loading of plugin modules via `libloading` (feature `dynamic`)
//! - Polling hot reload of loaded modules
//! - A registry and a priority-ordered dispatch pipeline

pub mod api;
pub mod dispatcher;
pub mod error;
pub mod ffi;
pub mod loader;
pub mod macros;
pub mod operation;
pub mod prelude;
pub mod registry;
pub mod security;
pub mod traits;
pub mod validation;

pub use api::context::OperationContext;
pub use error::{PluginError, PluginResult, Rejection};
pub use loader::module::{ModuleLoader, NativeModuleLoader, PluginInstance, PluginModule};
pub use loader::{LoadOutcome, LoadedPlugin, PluginLoader, PluginStatistics};
pub use operation::{OperationArgs, OperationResult, Priority, S3Operation};
pub use registry::PluginRegistry;
pub use security::{SecurityGate, SignatureVerifier};
pub use traits::{PluginMetadata, S3Plugin};
pub use validation::validate_plugin_interface;
