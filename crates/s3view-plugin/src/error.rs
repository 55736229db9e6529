//! Plugin runtime errors.
//!
//! Loader and registration failures are returned as [`PluginError`].
//! Dispatch failures never are: the dispatcher folds them into an
//! unsuccessful `OperationResult`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use s3view_core::error::{AppError, ErrorKind};

/// Convenience alias for plugin runtime results.
pub type PluginResult<T> = Result<T, PluginError>;

/// Why the verification gate refused a candidate file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The file extension is not in the configured allow-list.
    #[error("extension {0:?} is not allowed")]
    ExtensionNotAllowed(String),
    /// The path is a directory, socket, or similar.
    #[error("not a regular file")]
    NotAFile,
    /// The permission bits grant write access to everyone.
    #[error("file is world-writable (mode {mode:o})")]
    WorldWritable {
        /// Permission bits of the file.
        mode: u32,
    },
    /// The file exceeds the configured size ceiling.
    #[error("file too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        max: u64,
    },
    /// Sandbox mode is on and the file resolves outside every plugin directory.
    #[error("file is outside the configured plugin directories")]
    OutsidePluginDirectories,
    /// The detached signature did not validate.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    /// File metadata could not be read.
    #[error("cannot read file metadata: {0}")]
    Metadata(String),
}

/// Errors returned by the plugin loader and registry.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The verification gate refused the file.
    #[error("plugin '{}' rejected: {reason}", path.display())]
    Rejected {
        /// Candidate file.
        path: PathBuf,
        /// Gate verdict.
        reason: Rejection,
    },

    /// The module could not be loaded, resolved, instantiated, or initialized.
    #[error("failed to load plugin '{}': {reason}", path.display())]
    LoadFailed {
        /// Module file.
        path: PathBuf,
        /// Failure description.
        reason: String,
    },

    /// Instantiation and initialization did not finish within the load timeout.
    #[error("plugin '{}' timed out after {after:?}", path.display())]
    Timeout {
        /// Module file.
        path: PathBuf,
        /// Configured deadline.
        after: Duration,
    },

    /// The configured plugin limit is reached.
    #[error("maximum number of plugins ({max}) reached")]
    CapacityExceeded {
        /// Configured limit.
        max: usize,
    },

    /// The instance does not honour the base contract.
    #[error("invalid plugin contract: {0}")]
    ContractInvalid(String),

    /// Another file already provides a plugin with this name.
    #[error("plugin name '{name}' is already provided by '{}'", path.display())]
    NameConflict {
        /// Contested plugin name.
        name: String,
        /// File that owns the name.
        path: PathBuf,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// No plugin or file matches the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// A plugin reported a failure from one of its own methods.
    #[error("{0}")]
    Execution(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    /// Builds a load failure for `path`.
    pub fn load_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Builds a plugin-side execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Whether this error is a gate rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::Rejected { .. } => ErrorKind::Security,
            PluginError::LoadFailed { .. } | PluginError::Execution(_) => ErrorKind::Plugin,
            PluginError::Timeout { .. } => ErrorKind::Timeout,
            PluginError::CapacityExceeded { .. } => ErrorKind::Capacity,
            PluginError::ContractInvalid(_) => ErrorKind::Validation,
            PluginError::NameConflict { .. } => ErrorKind::Conflict,
            PluginError::Cancelled => ErrorKind::Cancelled,
            PluginError::NotFound(_) => ErrorKind::NotFound,
            PluginError::Io(_) => ErrorKind::Io,
            PluginError::Serialization(_) => ErrorKind::Serialization,
        };
        AppError::new(kind, err.to_string())
    }
}
