//! # s3view-core
//!
//! Core crate for s3view. Contains the configuration schemas and the
//! unified error system shared by the plugin runtime and the daemon.
//!
//! This crate has **no** internal dependencies on other s3view crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
