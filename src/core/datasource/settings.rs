/// Settings Store
///
/// Holds the raw configuration of every initialized datasource. Settings are
/// never cached: each resolution loads a fresh value from the stored blob and
/// overlays the request's connection options.
use crate::core::datasource::{ConnectionOptions, DatasourceId, RawConfig, Settings};
use crate::core::{DsError, Result};
use dashmap::DashMap;
use tracing::debug;

/// Concurrent map from datasource identity to its raw configuration.
#[derive(Debug, Default)]
pub struct SettingsStore {
    configs: DashMap<DatasourceId, RawConfig>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the configuration, replacing any previous one for `id`
    pub fn store(&self, id: DatasourceId, config: RawConfig) {
        if self.configs.insert(id, config).is_some() {
            debug!(datasource = %id, "replaced stored configuration");
        }
    }

    /// Returns a copy of the stored configuration
    pub fn get(&self, id: DatasourceId) -> Option<RawConfig> {
        self.configs.get(&id).map(|c| c.clone())
    }

    pub fn contains(&self, id: DatasourceId) -> bool {
        self.configs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Loads `settings` from the configuration stored for `id` and applies
    /// `options` on top.
    ///
    /// # Errors
    ///
    /// `DsError::NotInitialized` if `id` was never stored,
    /// `DsError::SettingsLoad` if the backend rejects the stored blob.
    pub fn resolve<S: Settings>(
        &self,
        id: DatasourceId,
        options: &ConnectionOptions,
        settings: &mut S,
    ) -> Result<()> {
        // Copy out so no shard lock is held while the backend parses.
        let config = self.get(id).ok_or(DsError::NotInitialized(id))?;
        settings.load(&config).map_err(DsError::SettingsLoad)?;
        settings.apply(options);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LoaderResult;

    #[derive(Default)]
    struct EchoSettings {
        database: String,
        region: String,
    }

    impl Settings for EchoSettings {
        fn load(&mut self, config: &RawConfig) -> LoaderResult<()> {
            self.database = config.database.clone();
            self.region = config
                .json_data
                .get("region")
                .and_then(|v| v.as_str())
                .ok_or("missing region")?
                .to_string();
            Ok(())
        }

        fn apply(&mut self, options: &ConnectionOptions) {
            if let Some(db) = options.get("database") {
                self.database = db.to_string();
            }
        }
    }

    fn config(database: &str) -> RawConfig {
        RawConfig::new("test")
            .with_database(database)
            .with_json_data(serde_json::json!({"region": "us-east-1"}))
    }

    #[test]
    fn test_resolve_not_initialized() {
        let store = SettingsStore::new();
        let mut settings = EchoSettings::default();
        let err = store
            .resolve(DatasourceId(1), &ConnectionOptions::new(), &mut settings)
            .unwrap_err();
        assert!(matches!(err, DsError::NotInitialized(DatasourceId(1))));
    }

    #[test]
    fn test_resolve_applies_options() {
        let store = SettingsStore::new();
        store.store(DatasourceId(1), config("default_db"));

        let mut settings = EchoSettings::default();
        store
            .resolve(DatasourceId(1), &ConnectionOptions::new(), &mut settings)
            .unwrap();
        assert_eq!(settings.database, "default_db");
        assert_eq!(settings.region, "us-east-1");

        let mut settings = EchoSettings::default();
        let options = ConnectionOptions::new().with("database", "other_db");
        store.resolve(DatasourceId(1), &options, &mut settings).unwrap();
        assert_eq!(settings.database, "other_db");
    }

    #[test]
    fn test_store_overwrites() {
        let store = SettingsStore::new();
        store.store(DatasourceId(1), config("first"));
        store.store(DatasourceId(1), config("second"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(DatasourceId(1)).unwrap().database, "second");
    }

    #[test]
    fn test_resolve_load_failure_is_wrapped() {
        let store = SettingsStore::new();
        store.store(DatasourceId(2), RawConfig::new("no-region"));

        let mut settings = EchoSettings::default();
        let err = store
            .resolve(DatasourceId(2), &ConnectionOptions::new(), &mut settings)
            .unwrap_err();
        assert!(matches!(err, DsError::SettingsLoad(_)));
        assert_eq!(err.to_string(), "error reading settings: missing region");
    }
}
