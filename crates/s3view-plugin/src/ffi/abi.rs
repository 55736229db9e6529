//! C entry points a dynamic plugin module exports.
//!
//! A module exports two symbols:
//!
//! ```c
//! const char* s3view_plugin_metadata(void);  // NUL-terminated JSON PluginMetadata
//! void*       s3view_plugin_create(void);    // *mut Box<dyn S3Plugin>, NULL on failure
//! ```
//!
//! The factory hands over a thin pointer to a boxed trait object so it
//! crosses the C ABI as a single word. Host and module must be built with
//! the same compiler and the same `s3view-plugin` version.

use std::os::raw::c_char;

use crate::traits::S3Plugin;

pub use s3view_core::config::plugin::{FACTORY_SYMBOL, METADATA_SYMBOL};

/// Boxed plugin instance as produced by a module factory.
pub type PluginBox = Box<dyn S3Plugin>;

/// Signature of the metadata accessor.
///
/// The returned string is owned by the module and must stay valid for as
/// long as the module is loaded.
pub type PluginMetadataFn = unsafe extern "C" fn() -> *const c_char;

/// Signature of the instance factory. Ownership of the pointee passes to
/// the caller.
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut PluginBox;
