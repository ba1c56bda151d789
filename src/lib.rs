//! Per-datasource connection factory and API-client cache.
//!
//! A host calls [`DatasourceFactory::init`] once per datasource with its raw
//! configuration, then asks for API clients or database handles per request.
//! API clients are built once per (datasource, connection options) and
//! reused; drivers and handles are built fresh on every call.
//!
//! ```no_run
//! use dsconn::backend::sqlite::{self, SqliteApi, SqliteSettings};
//! use dsconn::{ConnectionOptions, DatasourceFactory, DatasourceId, RawConfig};
//!
//! let factory: DatasourceFactory<SqliteApi> = DatasourceFactory::new();
//! factory.init(DatasourceId(1), RawConfig::new("local").with_database("app.db"));
//!
//! let conn = factory
//!     .get_db(
//!         DatasourceId(1),
//!         &ConnectionOptions::new(),
//!         SqliteSettings::default,
//!         sqlite::load_api,
//!         sqlite::load_driver,
//!     )
//!     .expect("open database");
//! # drop(conn);
//! ```

// Core infrastructure modules
pub mod core;

pub mod backend;
pub mod config;
pub mod logging;
pub mod session;

pub use crate::config::{load_config, Config};
pub use crate::core::datasource::{
    ApiKey, AsyncDb, AsyncDriver, ConnectionOptions, DatasourceFactory, DatasourceId, Driver, QueryRows,
    QueryStatus, RawConfig, Settings,
};
pub use crate::core::{BoxError, DsError, LoaderResult, Result, Step};
pub use crate::session::{AuthType, Session, SessionCache, SessionProvider, SessionRequest};
