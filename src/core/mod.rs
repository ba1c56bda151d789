/// Core Module for dsconn
///
/// This module contains the datasource factory and cache together with the
/// error type shared across the crate.

pub mod datasource;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{BoxError, DsError, LoaderResult, Result, Step};
