/// SQLite Backend
///
/// A complete backend for the datasource factory. The API client is the
/// validated connection target plus its session, the synchronous driver opens
/// `rusqlite::Connection`s, and the asynchronous driver runs each query on
/// its own thread and tracks it by id.
use crate::core::datasource::{
    AsyncDb, AsyncDriver, ConnectionOptions, Driver, QueryRows, QueryStatus, RawConfig, Settings,
};
use crate::core::error::LoaderResult;
use crate::session::{AuthType, Session, SessionProvider, SessionRequest};
use rusqlite::{types::ValueRef, Connection, InterruptHandle, OpenFlags};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Path of the in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Settings for a SQLite datasource.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteSettings {
    /// Database file, or `:memory:`
    pub path: String,
    pub busy_timeout_ms: u64,
    pub read_only: bool,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        SqliteSettings {
            path: String::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            read_only: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonData {
    path: Option<String>,
    busy_timeout_ms: Option<u64>,
    read_only: bool,
}

impl Settings for SqliteSettings {
    fn load(&mut self, config: &RawConfig) -> LoaderResult<()> {
        let json: JsonData = if config.json_data.is_null() {
            JsonData::default()
        } else {
            serde_json::from_value(config.json_data.clone())?
        };

        self.path = if config.database.is_empty() {
            json.path.unwrap_or_default()
        } else {
            config.database.clone()
        };
        self.busy_timeout_ms = json.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
        self.read_only = json.read_only;
        Ok(())
    }

    fn apply(&mut self, options: &ConnectionOptions) {
        if let Some(database) = options.get("database") {
            self.path = database.to_string();
        }
    }
}

/// API client for a SQLite datasource.
#[derive(Debug)]
pub struct SqliteApi {
    settings: SqliteSettings,
    session: Arc<Session>,
}

impl SqliteApi {
    pub fn path(&self) -> &str {
        &self.settings.path
    }

    pub fn settings(&self) -> &SqliteSettings {
        &self.settings
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn open_connection(&self) -> rusqlite::Result<Connection> {
        let conn = if self.settings.read_only {
            Connection::open_with_flags(
                &self.settings.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            Connection::open(&self.settings.path)?
        };

        conn.busy_timeout(Duration::from_millis(self.settings.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        if !self.settings.read_only && self.settings.path != MEMORY_PATH {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        }
        Ok(conn)
    }
}

/// API loader for SQLite datasources.
pub fn load_api(sessions: &dyn SessionProvider, settings: &SqliteSettings) -> LoaderResult<Arc<SqliteApi>> {
    if settings.path.is_empty() {
        return Err("no database path configured".into());
    }
    if settings.read_only && settings.path != MEMORY_PATH && !Path::new(&settings.path).exists() {
        return Err(format!("database file not found: {}", settings.path).into());
    }

    let session = sessions.get_session(&SessionRequest::new(AuthType::Default, "local"))?;
    Ok(Arc::new(SqliteApi {
        settings: settings.clone(),
        session,
    }))
}

/// Synchronous driver producing `rusqlite::Connection` handles.
#[derive(Debug)]
pub struct SqliteDriver {
    api: Arc<SqliteApi>,
}

/// Driver loader for `DatasourceFactory::get_db`.
pub fn load_driver(api: Arc<SqliteApi>) -> LoaderResult<SqliteDriver> {
    Ok(SqliteDriver { api })
}

impl Driver for SqliteDriver {
    type Db = Connection;

    fn open_db(&self) -> LoaderResult<Connection> {
        debug!(path = %self.api.path(), "opening sqlite connection");
        Ok(self.api.open_connection()?)
    }
}

/// Asynchronous driver producing `SqliteAsyncDb` handles.
#[derive(Debug)]
pub struct SqliteAsyncDriver {
    api: Arc<SqliteApi>,
}

/// Driver loader for `DatasourceFactory::get_async_db`.
pub fn load_async_driver(api: Arc<SqliteApi>) -> LoaderResult<SqliteAsyncDriver> {
    Ok(SqliteAsyncDriver { api })
}

impl AsyncDriver for SqliteAsyncDriver {
    type Db = SqliteAsyncDb;

    fn get_async_db(&self) -> LoaderResult<SqliteAsyncDb> {
        // Fail here rather than on the first query if the target is unusable.
        self.api.open_connection()?;
        Ok(SqliteAsyncDb {
            api: Arc::clone(&self.api),
            queries: Mutex::new(HashMap::new()),
        })
    }
}

enum QueryState {
    Running {
        result: Receiver<rusqlite::Result<QueryRows>>,
        interrupt: InterruptHandle,
    },
    Finished(QueryRows),
    Failed(String),
}

impl QueryState {
    fn poll(&mut self) {
        if let QueryState::Running { result, .. } = self {
            let next = match result.try_recv() {
                Ok(Ok(rows)) => QueryState::Finished(rows),
                Ok(Err(e)) => QueryState::Failed(e.to_string()),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => QueryState::Failed("query worker exited".to_string()),
            };
            *self = next;
        }
    }

    fn status(&self) -> QueryStatus {
        match self {
            QueryState::Running { .. } => QueryStatus::Running,
            QueryState::Finished(_) => QueryStatus::Finished,
            QueryState::Failed(_) => QueryStatus::Failed,
        }
    }
}

/// Asynchronous query handle over SQLite.
///
/// In a `:memory:` datasource every query opens its own private database.
/// A query id is released once its rows are fetched or it is canceled.
pub struct SqliteAsyncDb {
    api: Arc<SqliteApi>,
    queries: Mutex<HashMap<String, QueryState>>,
}

impl SqliteAsyncDb {
    fn with_query<T>(&self, query_id: &str, f: impl FnOnce(&mut QueryState) -> LoaderResult<T>) -> LoaderResult<T> {
        let mut queries = self.queries.lock().map_err(|_| "query registry lock poisoned")?;
        let state = queries
            .get_mut(query_id)
            .ok_or_else(|| format!("unknown query id: {}", query_id))?;
        state.poll();
        f(state)
    }
}

impl AsyncDb for SqliteAsyncDb {
    fn start_query(&mut self, query: &str) -> LoaderResult<String> {
        let conn = self.api.open_connection()?;
        let interrupt = conn.get_interrupt_handle();
        let (tx, rx) = mpsc::channel();
        let sql = query.to_string();

        thread::spawn(move || {
            let _ = tx.send(run_query(&conn, &sql));
        });

        let query_id = Uuid::new_v4().to_string();
        debug!(query_id = %query_id, "started query");
        let mut queries = self.queries.lock().map_err(|_| "query registry lock poisoned")?;
        queries.insert(
            query_id.clone(),
            QueryState::Running {
                result: rx,
                interrupt,
            },
        );
        Ok(query_id)
    }

    fn query_status(&self, query_id: &str) -> LoaderResult<QueryStatus> {
        self.with_query(query_id, |state| Ok(state.status()))
    }

    fn cancel_query(&mut self, query_id: &str) -> LoaderResult<()> {
        let mut queries = self.queries.lock().map_err(|_| "query registry lock poisoned")?;
        let state = queries
            .remove(query_id)
            .ok_or_else(|| format!("unknown query id: {}", query_id))?;
        if let QueryState::Running { interrupt, .. } = state {
            interrupt.interrupt();
            debug!(query_id = %query_id, "canceled query");
        }
        Ok(())
    }

    fn get_rows(&mut self, query_id: &str) -> LoaderResult<QueryRows> {
        let mut queries = self.queries.lock().map_err(|_| "query registry lock poisoned")?;
        let state = queries
            .get_mut(query_id)
            .ok_or_else(|| format!("unknown query id: {}", query_id))?;
        state.poll();
        if let QueryState::Running { .. } = state {
            return Err(format!("query {} is still running", query_id).into());
        }

        match queries.remove(query_id) {
            Some(QueryState::Finished(rows)) => Ok(rows),
            Some(QueryState::Failed(message)) => Err(format!("query {} failed: {}", query_id, message).into()),
            _ => Err(format!("unknown query id: {}", query_id).into()),
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = stmt.column_count();

    let rows = stmt
        .query_map([], |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(format_value(row.get_ref(i)?));
            }
            Ok(values)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(QueryRows { columns, rows })
}

fn format_value(value: ValueRef) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => format!("<BLOB: {} bytes>", b.len()),
    }
}
