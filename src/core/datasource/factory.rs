/// Connection Factory
///
/// `DatasourceFactory` owns the settings store, the API cache and the session
/// provider, and runs the connection pipeline for each request:
///
/// 1. resolve settings from the stored configuration and the request options
/// 2. get the API client from the cache, or build and cache one
/// 3. build a fresh driver from the API client
/// 4. open a fresh database handle from the driver
///
/// Only the API client is cached. Drivers and handles are built on every
/// call and handed to the caller, which owns them from then on.
use crate::config::{CacheConfig, Config};
use crate::core::datasource::{
    ApiCache, ApiKey, AsyncDriver, ConnectionOptions, DatasourceId, Driver, RawConfig, Settings,
    SettingsStore,
};
use crate::core::error::LoaderResult;
use crate::core::{DsError, Result};
use crate::session::{SessionCache, SessionProvider};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-datasource factory and cache of API clients of type `A`.
///
/// `A` is usually a backend client struct or a `dyn Trait` shared by several
/// backends. The factory is `Send + Sync`; share it behind an `Arc`.
pub struct DatasourceFactory<A: ?Sized> {
    sessions: Arc<dyn SessionProvider>,
    settings: SettingsStore,
    apis: ApiCache<A>,
}

impl<A: ?Sized + Send + Sync> DatasourceFactory<A> {
    /// Creates a factory with default configuration
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Creates a factory with a `SessionCache` built from `config`
    pub fn with_config(config: &Config) -> Self {
        let sessions = Arc::new(SessionCache::new(config.session.ttl()));
        Self::with_session_provider(sessions, &config.cache)
    }

    /// Creates a factory around a caller-supplied session provider
    pub fn with_session_provider(sessions: Arc<dyn SessionProvider>, cache: &CacheConfig) -> Self {
        DatasourceFactory {
            sessions,
            settings: SettingsStore::new(),
            apis: ApiCache::new(cache.single_flight),
        }
    }

    /// Stores the configuration of a datasource. Required before any of the
    /// `get_*` operations; calling it again replaces the configuration.
    pub fn init(&self, id: DatasourceId, config: RawConfig) {
        info!(datasource = %id, name = %config.name, "storing datasource configuration");
        self.settings.store(id, config);
    }

    /// Returns the API client for `id` and `options`.
    ///
    /// A cached client is returned without calling either loader. Otherwise
    /// settings are resolved and a new client is built and cached.
    pub fn get_api<S, L, F>(
        &self,
        id: DatasourceId,
        options: &ConnectionOptions,
        settings_loader: L,
        api_loader: F,
    ) -> Result<Arc<A>>
    where
        S: Settings,
        L: FnOnce() -> S,
        F: FnOnce(&dyn SessionProvider, &S) -> LoaderResult<Arc<A>>,
    {
        let key = ApiKey::new(id, options);
        if let Some(api) = self.apis.lookup(&key) {
            debug!(key = %key, "returning cached API client");
            return Ok(api);
        }

        let settings = self.resolve_settings(id, options, settings_loader)?;
        self.create_api(&key, &settings, api_loader)
    }

    /// Opens a new synchronous database handle for `id` and `options`.
    ///
    /// Settings are always resolved, the API client comes from the cache when
    /// present, and a fresh driver and handle are built on every call. A
    /// failure in the driver or handle step leaves the API client cached.
    pub fn get_db<S, L, F, D, DL>(
        &self,
        id: DatasourceId,
        options: &ConnectionOptions,
        settings_loader: L,
        api_loader: F,
        driver_loader: DL,
    ) -> Result<D::Db>
    where
        S: Settings,
        L: FnOnce() -> S,
        F: FnOnce(&dyn SessionProvider, &S) -> LoaderResult<Arc<A>>,
        D: Driver,
        DL: FnOnce(Arc<A>) -> LoaderResult<D>,
    {
        let api = self.acquire_api(id, options, settings_loader, api_loader)?;
        let driver = create_driver(id, api, driver_loader)?;
        driver.open_db().map_err(|e| {
            warn!(datasource = %id, error = %e, "failed to open database handle");
            DsError::HandleOpen(e)
        })
    }

    /// Same pipeline as `get_db`, producing an asynchronous query handle.
    pub fn get_async_db<S, L, F, D, DL>(
        &self,
        id: DatasourceId,
        options: &ConnectionOptions,
        settings_loader: L,
        api_loader: F,
        driver_loader: DL,
    ) -> Result<D::Db>
    where
        S: Settings,
        L: FnOnce() -> S,
        F: FnOnce(&dyn SessionProvider, &S) -> LoaderResult<Arc<A>>,
        D: AsyncDriver,
        DL: FnOnce(Arc<A>) -> LoaderResult<D>,
    {
        let api = self.acquire_api(id, options, settings_loader, api_loader)?;
        let driver = create_driver(id, api, driver_loader)?;
        driver.get_async_db().map_err(|e| {
            warn!(datasource = %id, error = %e, "failed to open async database handle");
            DsError::HandleOpen(e)
        })
    }

    /// Returns the cached API client without building one
    pub fn cached_api(&self, id: DatasourceId, options: &ConnectionOptions) -> Option<Arc<A>> {
        self.apis.lookup(&ApiKey::new(id, options))
    }

    pub fn cached_api_count(&self) -> usize {
        self.apis.len()
    }

    pub fn is_initialized(&self, id: DatasourceId) -> bool {
        self.settings.contains(id)
    }

    pub fn session_provider(&self) -> Arc<dyn SessionProvider> {
        Arc::clone(&self.sessions)
    }

    fn resolve_settings<S, L>(&self, id: DatasourceId, options: &ConnectionOptions, settings_loader: L) -> Result<S>
    where
        S: Settings,
        L: FnOnce() -> S,
    {
        let mut settings = settings_loader();
        self.settings.resolve(id, options, &mut settings)?;
        Ok(settings)
    }

    fn acquire_api<S, L, F>(
        &self,
        id: DatasourceId,
        options: &ConnectionOptions,
        settings_loader: L,
        api_loader: F,
    ) -> Result<Arc<A>>
    where
        S: Settings,
        L: FnOnce() -> S,
        F: FnOnce(&dyn SessionProvider, &S) -> LoaderResult<Arc<A>>,
    {
        let settings = self.resolve_settings(id, options, settings_loader)?;
        self.create_api(&ApiKey::new(id, options), &settings, api_loader)
    }

    fn create_api<S, F>(&self, key: &ApiKey, settings: &S, api_loader: F) -> Result<Arc<A>>
    where
        F: FnOnce(&dyn SessionProvider, &S) -> LoaderResult<Arc<A>>,
    {
        let sessions = self.sessions.as_ref();
        self.apis.get_or_create(key, || api_loader(sessions, settings))
    }
}

fn create_driver<A: ?Sized, D, DL>(id: DatasourceId, api: Arc<A>, driver_loader: DL) -> Result<D>
where
    DL: FnOnce(Arc<A>) -> LoaderResult<D>,
{
    driver_loader(api).map_err(|e| {
        warn!(datasource = %id, error = %e, "failed to create driver");
        DsError::DriverConstruction(e)
    })
}

impl<A: ?Sized + Send + Sync> Default for DatasourceFactory<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for DatasourceFactory<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasourceFactory")
            .field("settings", &self.settings.len())
            .field("apis", &self.apis)
            .finish()
    }
}
