/// Backend Loader Interfaces
///
/// Traits implemented by backend crates. The factory never knows a concrete
/// backend: callers hand it a settings factory, an API loader and a driver
/// loader per call, and the factory strings them together.
use crate::core::datasource::{ConnectionOptions, RawConfig};
use crate::core::error::LoaderResult;
use std::fmt;

/// Backend-specific settings, rebuilt from the stored `RawConfig` on every
/// resolution.
pub trait Settings {
    /// Populates the settings from the stored configuration blob
    fn load(&mut self, config: &RawConfig) -> LoaderResult<()>;

    /// Overlays per-request connection options
    fn apply(&mut self, options: &ConnectionOptions);
}

/// Builds synchronous database handles from an API client.
pub trait Driver {
    type Db;

    fn open_db(&self) -> LoaderResult<Self::Db>;
}

/// Builds asynchronous query handles from an API client.
pub trait AsyncDriver {
    type Db: AsyncDb;

    fn get_async_db(&self) -> LoaderResult<Self::Db>;
}

/// Lifecycle of a query submitted through an `AsyncDb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Unknown,
    Submitted,
    Running,
    Finished,
    Canceled,
    Failed,
}

impl QueryStatus {
    /// True once the query can no longer change state
    pub fn is_finished(self) -> bool {
        matches!(self, QueryStatus::Finished | QueryStatus::Canceled | QueryStatus::Failed)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStatus::Unknown => "unknown",
            QueryStatus::Submitted => "submitted",
            QueryStatus::Running => "running",
            QueryStatus::Finished => "finished",
            QueryStatus::Canceled => "canceled",
            QueryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result rows returned by an `AsyncDb`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Handle for backends that run queries asynchronously: a query is started,
/// polled by id, and its rows fetched once it finishes.
pub trait AsyncDb: Send {
    /// Submits a query and returns its id
    fn start_query(&mut self, query: &str) -> LoaderResult<String>;

    fn query_status(&self, query_id: &str) -> LoaderResult<QueryStatus>;

    fn cancel_query(&mut self, query_id: &str) -> LoaderResult<()>;

    /// Fetches the rows of a finished query
    fn get_rows(&mut self, query_id: &str) -> LoaderResult<QueryRows>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_status_terminal_states() {
        assert!(QueryStatus::Finished.is_finished());
        assert!(QueryStatus::Canceled.is_finished());
        assert!(QueryStatus::Failed.is_finished());
        assert!(!QueryStatus::Running.is_finished());
        assert!(!QueryStatus::Submitted.is_finished());
        assert!(!QueryStatus::Unknown.is_finished());
    }

    #[test]
    fn test_query_status_display() {
        assert_eq!(QueryStatus::Running.to_string(), "running");
        assert_eq!(QueryStatus::Canceled.to_string(), "canceled");
    }
}
