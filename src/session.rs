//! Session provider for API loaders.
//!
//! API loaders call `SessionProvider::get_session` to obtain authentication
//! material instead of authenticating on every call. `SessionCache` is the
//! default provider: it keeps one session per distinct request and renews it
//! once its TTL has passed.

use crate::core::{DsError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// How a session authenticates against the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Ambient credentials of the host process
    #[default]
    Default,
    /// Static access key and secret key
    Keys,
    /// Named profile from a shared credentials file
    SharedCredentials,
    /// Instance role
    Ec2IamRole,
}

/// Parameters identifying a session. Equal requests share a session.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionRequest {
    pub auth_type: AuthType,
    pub region: String,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub assume_role_arn: Option<String>,
}

impl SessionRequest {
    pub fn new(auth_type: AuthType, region: impl Into<String>) -> Self {
        SessionRequest {
            auth_type,
            region: region.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        match self.auth_type {
            AuthType::Keys if self.access_key.as_deref().unwrap_or("").is_empty() => {
                Err(DsError::Session("access key is required for key authentication".to_string()))
            }
            AuthType::Keys if self.secret_key.as_deref().unwrap_or("").is_empty() => {
                Err(DsError::Session("secret key is required for key authentication".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("auth_type", &self.auth_type)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("profile", &self.profile)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("assume_role_arn", &self.assume_role_arn)
            .finish()
    }
}

/// Authentication material handed to API loaders.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: SessionRequest,
    expires_at: Option<Instant>,
}

impl Session {
    fn new(request: SessionRequest, ttl: Option<Duration>) -> Self {
        Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            request,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

/// Supplies sessions to API loaders.
pub trait SessionProvider: Send + Sync {
    /// Returns a live session for `request`, creating one if needed
    fn get_session(&self, request: &SessionRequest) -> Result<Arc<Session>>;
}

/// In-memory session provider with per-request memoization.
#[derive(Debug)]
pub struct SessionCache {
    sessions: DashMap<SessionRequest, Arc<Session>>,
    ttl: Option<Duration>,
}

impl SessionCache {
    /// Creates a cache whose sessions are renewed after `ttl`; `None` keeps
    /// them for the life of the process
    pub fn new(ttl: Option<Duration>) -> Self {
        SessionCache {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        SessionCache::new(Some(Duration::from_secs(crate::config::DEFAULT_SESSION_TTL_SECS)))
    }
}

impl SessionProvider for SessionCache {
    fn get_session(&self, request: &SessionRequest) -> Result<Arc<Session>> {
        let cached = self.sessions.get(request).map(|s| Arc::clone(s.value()));
        if let Some(session) = cached {
            if !session.is_expired() {
                return Ok(session);
            }
            debug!(session = %session.id, "session expired, renewing");
        }

        request.validate()?;
        let session = Arc::new(Session::new(request.clone(), self.ttl));
        self.sessions.insert(request.clone(), Arc::clone(&session));
        info!(
            session = %session.id,
            auth_type = ?request.auth_type,
            region = %request.region,
            "created session"
        );
        Ok(session)
    }
}
