//! Plugin API — the per-call context handed to plugin code.

pub mod context;

pub use context::{OperationContext, ProgressFn};
