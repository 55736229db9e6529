//! Convenience result type alias for s3view.

use crate::error::AppError;

/// A specialized `Result` type for s3view operations.
pub type AppResult<T> = Result<T, AppError>;
