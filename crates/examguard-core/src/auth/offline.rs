//! Cached credentials for logging in while the backend is unreachable.
//!
//! After every successful online login the gateway records an Argon2id
//! verifier for the password, the user's profile, and the issued token. An
//! offline login must match all three of username, password and role, and
//! the cache entry must be younger than the configured maximum age.
//!
//! The cache cannot learn about server-side revocation. A user disabled on
//! the server can still log in offline until the entry ages out.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::password::{hash_password, verify_password};
use crate::session::{Role, UserProfile};
use crate::storage::{keys, SecureStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCredential {
    pub user: UserProfile,
    pub verifier: String,
    #[serde(default)]
    pub token: Option<String>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfflineRejection {
    #[error("no cached login for this user")]
    NoCredential,

    #[error("password does not match the cached login")]
    WrongPassword,

    #[error("cached login is for a different role")]
    RoleMismatch,

    #[error("cached login is {age_days} days old")]
    TooOld { age_days: i64 },
}

type CredentialMap = BTreeMap<String, OfflineCredential>;

pub struct OfflineCredentials {
    store: Arc<SecureStore>,
    max_age: Duration,
}

fn cache_key(username: &str) -> String {
    username.trim().to_lowercase()
}

impl OfflineCredentials {
    pub fn new(store: Arc<SecureStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn load(&self) -> CredentialMap {
        self.store
            .get_json(keys::OFFLINE_CREDENTIALS)
            .unwrap_or_default()
    }

    fn save(&self, map: &CredentialMap) -> Result<()> {
        if map.is_empty() {
            self.store.remove(keys::OFFLINE_CREDENTIALS)
        } else {
            self.store.set_json(keys::OFFLINE_CREDENTIALS, map)
        }
    }

    /// Record a successful online login.
    pub fn remember(&self, user: &UserProfile, password: &str, token: Option<&str>) -> Result<()> {
        self.insert(user, password, token, Utc::now())
    }

    fn insert(
        &self,
        user: &UserProfile,
        password: &str,
        token: Option<&str>,
        cached_at: DateTime<Utc>,
    ) -> Result<()> {
        let credential = OfflineCredential {
            user: user.clone(),
            verifier: hash_password(password)?,
            token: token.map(str::to_string),
            cached_at,
        };
        let mut map = self.load();
        map.insert(cache_key(&user.username), credential);
        self.save(&map)?;
        debug!(username = %user.username, "Cached offline credential");
        Ok(())
    }

    /// Check an offline login attempt against the cache.
    pub fn verify(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<OfflineCredential, OfflineRejection> {
        let credential = self
            .load()
            .remove(&cache_key(username))
            .ok_or(OfflineRejection::NoCredential)?;

        let age = Utc::now() - credential.cached_at;
        if age > self.max_age {
            return Err(OfflineRejection::TooOld {
                age_days: age.num_days(),
            });
        }
        if !verify_password(password, &credential.verifier) {
            return Err(OfflineRejection::WrongPassword);
        }
        if credential.user.role != role {
            return Err(OfflineRejection::RoleMismatch);
        }
        Ok(credential)
    }

    /// Whether this device has a cached login for `username`, of any age.
    pub fn knows(&self, username: &str) -> bool {
        self.load().contains_key(&cache_key(username))
    }

    pub fn forget(&self, username: &str) {
        let mut map = self.load();
        if map.remove(&cache_key(username)).is_some() {
            if let Err(e) = self.save(&map) {
                warn!(error = %e, "Failed to drop offline credential");
            }
        }
    }

    /// Drop entries older than the maximum age. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut map = self.load();
        let before = map.len();
        let cutoff = Utc::now() - self.max_age;
        map.retain(|_, credential| credential.cached_at >= cutoff);
        let removed = before - map.len();
        if removed > 0 {
            if let Err(e) = self.save(&map) {
                warn!(error = %e, "Failed to prune offline credentials");
            }
        }
        removed
    }
}
