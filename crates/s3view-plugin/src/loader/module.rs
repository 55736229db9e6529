//! OS-level module loading behind two small traits, so the loader's
//! lifecycle logic does not depend on `libloading` directly.

use std::path::Path;
use std::sync::Arc;

use crate::error::PluginResult;
use crate::ffi::abi::PluginBox;
use crate::traits::{PluginMetadata, S3Plugin};

/// A loaded module with its entry points resolved.
pub trait PluginModule: Send + Sync + std::fmt::Debug {
    /// Calls the metadata accessor.
    fn metadata(&self) -> PluginResult<PluginMetadata>;

    /// Calls the instance factory.
    fn create(&self) -> PluginResult<PluginBox>;
}

/// Opens module files.
pub trait ModuleLoader: Send + Sync + std::fmt::Debug {
    /// Loads `path` and checks that every name in `required_symbols`
    /// resolves. Not cancellable once started.
    fn open(&self, path: &Path, required_symbols: &[String]) -> PluginResult<Arc<dyn PluginModule>>;
}

/// A plugin instance together with the module whose code backs it.
///
/// `plugin` is declared first so it is dropped before `module`: the module
/// is unmapped only after the last `Arc<PluginInstance>` is gone, and never
/// while its vtable is still reachable.
pub struct PluginInstance {
    /// The instance.
    plugin: PluginBox,
    /// Backing module, `None` for compiled-in plugins.
    module: Option<Arc<dyn PluginModule>>,
}

impl PluginInstance {
    /// Wraps a compiled-in plugin.
    pub fn new(plugin: PluginBox) -> Self {
        Self {
            plugin,
            module: None,
        }
    }

    /// Instantiates a plugin from `module` through its factory.
    pub fn from_module(module: Arc<dyn PluginModule>) -> PluginResult<Self> {
        let plugin = module.create()?;
        Ok(Self {
            plugin,
            module: Some(module),
        })
    }

    /// The plugin instance.
    pub fn plugin(&self) -> &dyn S3Plugin {
        self.plugin.as_ref()
    }

    /// Whether this instance came from a dynamically loaded module.
    pub fn is_dynamic(&self) -> bool {
        self.module.is_some()
    }
}

impl std::ops::Deref for PluginInstance {
    type Target = dyn S3Plugin;

    fn deref(&self) -> &Self::Target {
        self.plugin.as_ref()
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin", &self.plugin)
            .field("dynamic", &self.module.is_some())
            .finish()
    }
}

/// Native loader using `libloading` (feature-gated).
#[cfg(feature = "dynamic")]
pub mod native {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use libloading::{Library, Symbol};
    use tracing::debug;

    use crate::error::{PluginError, PluginResult};
    use crate::ffi::abi::{
        FACTORY_SYMBOL, METADATA_SYMBOL, PluginBox, PluginCreateFn, PluginMetadataFn,
    };
    use crate::ffi::safety::{metadata_from_c_str, plugin_from_raw};
    use crate::traits::PluginMetadata;

    use super::{ModuleLoader, PluginModule};

    /// Loads plugin modules from shared libraries (.so / .dylib / .dll).
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeModuleLoader;

    impl NativeModuleLoader {
        /// Creates a native loader.
        pub fn new() -> Self {
            Self
        }
    }

    impl ModuleLoader for NativeModuleLoader {
        fn open(
            &self,
            path: &Path,
            required_symbols: &[String],
        ) -> PluginResult<Arc<dyn PluginModule>> {
            // SAFETY: loading runs the module's initialisers. Only files that
            // passed the verification gate reach this point.
            let library = unsafe { Library::new(path) }.map_err(|e| {
                PluginError::load_failed(path, format!("failed to load library: {e}"))
            })?;

            for symbol in required_symbols {
                // SAFETY: the symbol is only looked up, never called, here.
                unsafe { library.get::<*const ()>(symbol.as_bytes()) }.map_err(|e| {
                    PluginError::load_failed(path, format!("missing symbol '{symbol}': {e}"))
                })?;
            }

            debug!(path = %path.display(), "Library loaded and symbols resolved");

            Ok(Arc::new(NativeModule {
                path: path.to_path_buf(),
                library,
            }))
        }
    }

    /// A shared library kept mapped for as long as this value lives.
    #[derive(Debug)]
    struct NativeModule {
        /// Source file.
        path: PathBuf,
        /// The mapped library.
        library: Library,
    }

    impl PluginModule for NativeModule {
        fn metadata(&self) -> PluginResult<PluginMetadata> {
            // SAFETY: the ABI fixes this symbol's signature.
            let accessor: Symbol<PluginMetadataFn> =
                unsafe { self.library.get(METADATA_SYMBOL.as_bytes()) }.map_err(|e| {
                    PluginError::load_failed(&self.path, format!("missing metadata accessor: {e}"))
                })?;

            // SAFETY: the accessor returns a module-owned C string that lives
            // as long as the library.
            unsafe { metadata_from_c_str(accessor()) }
        }

        fn create(&self) -> PluginResult<PluginBox> {
            // SAFETY: the ABI fixes this symbol's signature.
            let factory: Symbol<PluginCreateFn> =
                unsafe { self.library.get(FACTORY_SYMBOL.as_bytes()) }.map_err(|e| {
                    PluginError::load_failed(&self.path, format!("missing factory: {e}"))
                })?;

            // SAFETY: the factory transfers ownership of a pointer produced
            // by `plugin_into_raw`, or returns null.
            let raw = unsafe { factory() };
            unsafe { plugin_from_raw(raw) }.ok_or_else(|| {
                PluginError::load_failed(&self.path, "factory returned a null instance")
            })
        }
    }
}

/// Stub loader when the dynamic feature is not enabled.
#[cfg(not(feature = "dynamic"))]
pub mod native {
    use std::path::Path;
    use std::sync::Arc;

    use crate::error::{PluginError, PluginResult};

    use super::{ModuleLoader, PluginModule};

    /// Stub native loader; every open fails.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeModuleLoader;

    impl NativeModuleLoader {
        /// Creates a stub loader.
        pub fn new() -> Self {
            Self
        }
    }

    impl ModuleLoader for NativeModuleLoader {
        fn open(
            &self,
            path: &Path,
            _required_symbols: &[String],
        ) -> PluginResult<Arc<dyn PluginModule>> {
            Err(PluginError::load_failed(
                path,
                "dynamic loading is disabled (build with the `dynamic` feature)",
            ))
        }
    }
}

pub use native::NativeModuleLoader;

#[cfg(all(test, feature = "dynamic"))]
mod tests {
    use super::*;

    #[test]
    fn test_native_loader_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"definitely not an ELF file").unwrap();

        let err = NativeModuleLoader::new()
            .open(&path, &["s3view_plugin_create".to_string()])
            .unwrap_err();
        assert!(matches!(err, crate::error::PluginError::LoadFailed { .. }));
    }
}
