//! Operation context — the per-call bundle handed to every pipeline stage.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::operation::S3Operation;

/// Progress callback: `(bytes_processed, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Context passed to plugins for a single dispatch.
///
/// Created fresh by the caller for each dispatch and only ever lent to
/// plugins by shared reference.
#[derive(Clone)]
pub struct OperationContext {
    /// Cancellation scope of the call.
    pub cancel: CancellationToken,
    /// Requested operation.
    pub operation: S3Operation,
    /// Target bucket.
    pub bucket: String,
    /// Target key or prefix.
    pub key: String,
    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
    /// Optional progress sink.
    pub progress: Option<ProgressFn>,
    /// Span plugins log under.
    pub span: tracing::Span,
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation", &self.operation)
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl OperationContext {
    /// Creates a context for `operation` on `bucket`/`key`.
    pub fn new(operation: S3Operation, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let key = key.into();
        let span = tracing::info_span!(
            "s3_operation",
            operation = %operation,
            bucket = %bucket,
            key = %key
        );
        Self {
            cancel: CancellationToken::new(),
            operation,
            bucket,
            key,
            metadata: HashMap::new(),
            progress: None,
            span,
        }
    }

    /// Binds the context to an existing cancellation scope.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Inserts a metadata value.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Installs a progress callback.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Reports progress if a callback is installed.
    pub fn report_progress(&self, processed: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(processed, total);
        }
    }

    /// Whether the caller has cancelled this operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
