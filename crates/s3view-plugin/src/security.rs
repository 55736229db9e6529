//! Verification gate — checks a candidate module file before it is loaded.
//!
//! Checks, in order: extension allow-list, regular file, no world-write
//! permission (Unix), size ceiling, sandbox containment (when enabled), and
//! the detached signature (when enabled).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use s3view_core::config::PluginConfig;

use crate::error::{PluginError, PluginResult, Rejection};

/// Validates a detached signature for a module file.
pub trait SignatureVerifier: Send + Sync + std::fmt::Debug {
    /// Returns `Err(reason)` when the signature does not validate.
    fn verify(&self, path: &Path) -> Result<(), String>;
}

/// Placeholder verifier: no signing scheme is defined yet, so it accepts
/// every file. It exists so `verify_signatures = true` has a visible hook;
/// it provides no guarantee.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedSignatureVerifier;

impl SignatureVerifier for UnimplementedSignatureVerifier {
    fn verify(&self, path: &Path) -> Result<(), String> {
        warn!(
            path = %path.display(),
            "Signature verification requested but no signing scheme is implemented; accepting"
        );
        Ok(())
    }
}

/// Pre-load checks applied to every candidate file.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    /// Lower-case extensions without the leading dot.
    allowed_extensions: Vec<String>,
    /// Size ceiling in bytes.
    max_file_size: u64,
    /// Require containment in a plugin directory.
    sandbox_mode: bool,
    /// Run the signature verifier.
    verify_signatures: bool,
    /// Signature verifier.
    verifier: Arc<dyn SignatureVerifier>,
}

impl SecurityGate {
    /// Builds a gate from the plugin configuration.
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_file_size: config.max_file_size_bytes,
            sandbox_mode: config.sandbox_mode,
            verify_signatures: config.verify_signatures,
            verifier: Arc::new(UnimplementedSignatureVerifier),
        }
    }

    /// Replaces the signature verifier.
    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Whether `path` carries an allowed extension.
    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == e)
            })
            .unwrap_or(false)
    }

    /// Runs every check against `path`. `plugin_dirs` are the current plugin
    /// directories, consulted only in sandbox mode.
    pub fn check(&self, path: &Path, plugin_dirs: &[PathBuf]) -> Result<(), Rejection> {
        if !self.has_allowed_extension(path) {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(Rejection::ExtensionNotAllowed(ext));
        }

        let metadata = std::fs::metadata(path).map_err(|e| Rejection::Metadata(e.to_string()))?;

        if !metadata.is_file() {
            return Err(Rejection::NotAFile);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = metadata.permissions().mode() & 0o7777;
            if mode & 0o002 != 0 {
                return Err(Rejection::WorldWritable { mode });
            }
        }

        if metadata.len() > self.max_file_size {
            return Err(Rejection::TooLarge {
                size: metadata.len(),
                max: self.max_file_size,
            });
        }

        if self.sandbox_mode && !is_within(path, plugin_dirs) {
            return Err(Rejection::OutsidePluginDirectories);
        }

        if self.verify_signatures {
            self.verifier
                .verify(path)
                .map_err(Rejection::SignatureInvalid)?;
        }

        debug!(path = %path.display(), "Plugin file passed verification");
        Ok(())
    }

    /// [`SecurityGate::check`] on the blocking pool, with the verdict
    /// wrapped in a [`PluginError`].
    pub async fn verify(&self, path: &Path, plugin_dirs: &[PathBuf]) -> PluginResult<()> {
        let gate = self.clone();
        let file = path.to_path_buf();
        let dirs = plugin_dirs.to_vec();

        tokio::task::spawn_blocking(move || gate.check(&file, &dirs))
            .await
            .map_err(|e| PluginError::load_failed(path, format!("verification task failed: {e}")))?
            .map_err(|reason| PluginError::Rejected {
                path: path.to_path_buf(),
                reason,
            })
    }
}

/// Whether `path` resolves inside one of `dirs`.
fn is_within(path: &Path, dirs: &[PathBuf]) -> bool {
    let Ok(canonical) = path.canonicalize() else {
        return false;
    };

    dirs.iter().any(|dir| {
        dir.canonicalize()
            .map(|dir| canonical.starts_with(dir))
            .unwrap_or(false)
    })
}
