/// dsconn Error Module
///
/// This module defines the error type shared by the settings store, the API
/// cache and the connection factory. Every pipeline step wraps the failure of
/// the loader it called with a fixed, step-identifying message and keeps the
/// original error reachable through `source()`.
use crate::core::datasource::DatasourceId;
use thiserror::Error;

/// Error type produced by backend loaders, drivers and async handles.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by caller-supplied loader callbacks.
pub type LoaderResult<T> = std::result::Result<T, BoxError>;

/// Comprehensive error type for dsconn.
///
/// The first five variants cover the four steps of the connection pipeline:
/// - settings lookup and parsing: `NotInitialized` and `SettingsLoad`
/// - API client construction: `ApiConstruction`
/// - driver construction: `DriverConstruction`
/// - opening the database handle: `HandleOpen`
#[derive(Error, Debug)]
pub enum DsError {
    /// `init` was never called for this datasource
    #[error("unable to find stored configuration for datasource {0}. Initialize it first")]
    NotInitialized(DatasourceId),

    /// The stored configuration could not be loaded into backend settings
    #[error("error reading settings: {0}")]
    SettingsLoad(#[source] BoxError),

    /// The API loader failed (usually authentication or network)
    #[error("failed to create client: {0}")]
    ApiConstruction(#[source] BoxError),

    /// The driver loader failed to build a driver from the API client
    #[error("failed to create driver: {0}")]
    DriverConstruction(#[source] BoxError),

    /// The driver could not open a database handle
    #[error("failed to connect to database (check hostname and port?): {0}")]
    HandleOpen(#[source] BoxError),

    /// Session provider failures
    #[error("session error: {0}")]
    Session(String),

    /// Configuration loading and validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing errors for host-supplied configuration blobs
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Settings,
    Api,
    Driver,
    Handle,
    Other,
}

impl DsError {
    /// Returns the pipeline step that produced this error.
    pub fn step(&self) -> Step {
        match self {
            DsError::NotInitialized(_) | DsError::SettingsLoad(_) => Step::Settings,
            DsError::ApiConstruction(_) => Step::Api,
            DsError::DriverConstruction(_) => Step::Driver,
            DsError::HandleOpen(_) => Step::Handle,
            _ => Step::Other,
        }
    }
}

/// Type alias for Result to use DsError as the error type.
pub type Result<T> = std::result::Result<T, DsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DsError::NotInitialized(DatasourceId(7));
        assert_eq!(
            err.to_string(),
            "unable to find stored configuration for datasource 7. Initialize it first"
        );

        let err = DsError::ApiConstruction("access denied".into());
        assert_eq!(err.to_string(), "failed to create client: access denied");

        let err = DsError::HandleOpen("connection refused".into());
        assert!(err.to_string().starts_with("failed to connect to database"));
    }

    #[test]
    fn test_source_is_preserved() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = DsError::DriverConstruction(Box::new(cause));
        let source = err.source().expect("cause should be kept");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_step_classification() {
        assert_eq!(DsError::NotInitialized(DatasourceId(1)).step(), Step::Settings);
        assert_eq!(DsError::SettingsLoad("x".into()).step(), Step::Settings);
        assert_eq!(DsError::ApiConstruction("x".into()).step(), Step::Api);
        assert_eq!(DsError::DriverConstruction("x".into()).step(), Step::Driver);
        assert_eq!(DsError::HandleOpen("x".into()).step(), Step::Handle);
        assert_eq!(DsError::Config("x".into()).step(), Step::Other);
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DsError = io_err.into();
        match err {
            DsError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: DsError = toml_err.into();
        match err {
            DsError::Toml(_) => {}
            _ => panic!("Expected TOML error"),
        }
    }
}
