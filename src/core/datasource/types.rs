/// Datasource Identity and Configuration Types
///
/// Value types shared by the settings store, the API cache and the factory.
use crate::core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifies one configured datasource instance within the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasourceId(pub i64);

impl fmt::Display for DatasourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DatasourceId {
    fn from(id: i64) -> Self {
        DatasourceId(id)
    }
}

/// Per-request connection parameters such as the target database or catalog.
///
/// Entries are kept sorted by key, so two option sets built in a different
/// order compare, hash and render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionOptions(BTreeMap<String, String>);

impl ConnectionOptions {
    /// Creates an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces an option, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates options in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical string form: `{k1=v1,k2=v2}` in key order.
    ///
    /// Structural characters inside keys and values are backslash-escaped so
    /// the rendering is injective.
    pub fn canonical(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_escaped(&mut out, key);
            out.push('=');
            push_escaped(&mut out, value);
        }
        out.push('}');
        out
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | '=' | ',' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ConnectionOptions(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Configuration blob supplied by the host for one datasource instance.
///
/// Stored verbatim by the settings store; backends interpret it through
/// their `Settings::load` implementation.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub database: String,
    /// Backend-specific, non-secret settings
    #[serde(default)]
    pub json_data: serde_json::Value,
    /// Decrypted secrets. Never serialized back out and never logged.
    #[serde(default, skip_serializing)]
    pub secure_json_data: HashMap<String, String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl RawConfig {
    pub fn new(name: impl Into<String>) -> Self {
        RawConfig {
            name: name.into(),
            updated: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Parses a host-supplied JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_json_data(mut self, json_data: serde_json::Value) -> Self {
        self.json_data = json_data;
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secure_json_data.insert(key.into(), value.into());
        self
    }

    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secure_json_data.get(key).map(String::as_str)
    }
}

impl fmt::Debug for RawConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_keys: Vec<&str> = self.secure_json_data.keys().map(String::as_str).collect();
        secret_keys.sort_unstable();
        f.debug_struct("RawConfig")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("database", &self.database)
            .field("json_data", &self.json_data)
            .field("secure_json_data", &secret_keys)
            .field("updated", &self.updated)
            .finish()
    }
}
