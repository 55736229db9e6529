//! S3 operation tags, argument maps, results, and priorities.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Free-form argument map threaded through a dispatch pipeline.
pub type OperationArgs = HashMap<String, serde_json::Value>;

/// Enumeration of the S3 operations a plugin can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum S3Operation {
    /// Fetch an object.
    Download,
    /// Store an object.
    Upload,
    /// Remove an object.
    Delete,
    /// List a bucket or prefix.
    List,
    /// Copy an object.
    Copy,
    /// Move (copy then delete) an object.
    Move,
    /// Synchronise a prefix with a local directory.
    Sync,
    /// Read object metadata.
    Head,
    /// Run a query against an object (S3 Select style).
    Select,
    /// Apply one action to many items.
    Batch,
    /// Transform a transfer stream.
    Transform,
}

impl S3Operation {
    /// All operations, in declaration order.
    pub const ALL: [S3Operation; 11] = [
        Self::Download,
        Self::Upload,
        Self::Delete,
        Self::List,
        Self::Copy,
        Self::Move,
        Self::Sync,
        Self::Head,
        Self::Select,
        Self::Batch,
        Self::Transform,
    ];

    /// Returns the string name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Sync => "sync",
            Self::Head => "head",
            Self::Select => "select",
            Self::Batch => "batch",
            Self::Transform => "transform",
        }
    }
}

impl std::fmt::Display for S3Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for S3Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown S3 operation '{s}'"))
    }
}

/// Execution priority. Higher values run earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Runs last.
    pub const LOWEST: Priority = Priority(0);
    /// Below the default.
    pub const LOW: Priority = Priority(25);
    /// Default for plugins that do not declare a priority.
    pub const MEDIUM: Priority = Priority(50);
    /// Above the default.
    pub const HIGH: Priority = Priority(75);
    /// Runs first.
    pub const HIGHEST: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

/// Outcome of one pipeline stage, and of a whole dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Opaque result payload.
    pub data: serde_json::Value,
    /// Free-form metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Total bytes the operation covers.
    pub bytes_total: u64,
    /// Bytes processed so far.
    pub bytes_processed: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Failure description, if any.
    pub error: Option<String>,
}

impl OperationResult {
    /// Creates a successful result.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Creates a failed result carrying `error`.
    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Result returned when no plugin handles an operation.
    pub fn no_handler() -> Self {
        Self {
            success: false,
            message: "no handler".to_string(),
            ..Self::default()
        }
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Inserts a metadata value.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Sets the byte counters.
    pub fn with_bytes(mut self, total: u64, processed: u64) -> Self {
        self.bytes_total = total;
        self.bytes_processed = processed;
        self
    }
}
