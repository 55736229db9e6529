//! # s3view-plugin-sdk
//!
//! SDK for developing s3view plugin modules.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use s3view_plugin_sdk::prelude::*;
//! use s3view_plugin_sdk::{serde_json, tracing};
//!
//! #[derive(Debug, Default)]
//! struct Audit;
//!
//! #[async_trait]
//! impl S3Plugin for Audit {
//!     fn metadata(&self) -> PluginMetadata {
//!         plugin_metadata!(name: "audit", version: "1.0.0")
//!     }
//!
//!     fn supported_operations(&self) -> Vec<S3Operation> {
//!         vec![S3Operation::Upload, S3Operation::Delete]
//!     }
//!
//!     async fn initialize(&self, _config: Option<&serde_json::Value>) -> PluginResult<()> { Ok(()) }
//!
//!     async fn execute(&self, ctx: &OperationContext, _args: &OperationArgs) -> PluginResult<OperationResult> {
//!         tracing::info!(bucket = %ctx.bucket, key = %ctx.key, "audited");
//!         Ok(OperationResult::success("audited"))
//!     }
//!
//!     async fn cleanup(&self) -> PluginResult<()> { Ok(()) }
//! }
//!
//! export_plugin!(Audit::default());
//! ```
//!
//! Build the crate as a `cdylib` and drop the library into a plugin
//! directory.

/// Re-exported for plugin crates, which receive configuration as JSON.
pub use serde_json;
/// Re-exported for plugin crates; events land in the host's subscriber.
pub use tracing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use s3view_plugin::prelude::*;

    pub use crate::export_plugin;
}

#[doc(hidden)]
pub mod __private {
    pub use s3view_plugin::ffi::abi::PluginBox;
    pub use s3view_plugin::ffi::safety::{metadata_to_c_string, plugin_into_raw};
    pub use s3view_plugin::traits::S3Plugin;
}

/// Exports the module entry points for a plugin type.
///
/// `$constructor` is evaluated once for the metadata accessor and once per
/// factory call. A panicking constructor makes the factory return null and
/// the accessor return null.
#[macro_export]
macro_rules! export_plugin {
    ($constructor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn s3view_plugin_metadata() -> *const ::std::os::raw::c_char {
            static METADATA: ::std::sync::OnceLock<Option<::std::ffi::CString>> =
                ::std::sync::OnceLock::new();

            METADATA
                .get_or_init(|| {
                    ::std::panic::catch_unwind(|| {
                        let plugin: $crate::__private::PluginBox = Box::new($constructor);
                        $crate::__private::metadata_to_c_string(
                            &$crate::__private::S3Plugin::metadata(plugin.as_ref()),
                        )
                        .ok()
                    })
                    .ok()
                    .flatten()
                })
                .as_ref()
                .map(|metadata| metadata.as_ptr())
                .unwrap_or(::std::ptr::null())
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn s3view_plugin_create() -> *mut $crate::__private::PluginBox {
            ::std::panic::catch_unwind(|| {
                let plugin: $crate::__private::PluginBox = Box::new($constructor);
                $crate::__private::plugin_into_raw(plugin)
            })
            .unwrap_or(::std::ptr::null_mut())
        }
    };
}
