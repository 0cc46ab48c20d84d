//! Host-side credential store backing the `auth:*` channels.
//!
//! Users are kept as Argon2id hashes in a key-value file owned by the host.
//! Tokens are random, opaque, held only in memory, and expire.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::{LoginRequest, LoginResponse, RegistrationRequest, TokenPair};
use crate::session::{generate_session_id, UserProfile};
use crate::storage::KvBackend;

/// Key holding the user table in the host's store.
const USERS_KEY: &str = "host_users";

/// Default lifetime of an access token issued by the host.
pub const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    profile: UserProfile,
    password_hash: String,
    created_at: DateTime<Utc>,
}

struct IssuedToken {
    username: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tokens {
    access: HashMap<String, IssuedToken>,
    /// refresh token -> username
    refresh: HashMap<String, String>,
}

pub struct CredentialStore {
    backend: Arc<dyn KvBackend>,
    token_lifetime: Duration,
    tokens: Mutex<Tokens>,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KvBackend>, token_lifetime: Duration) -> Self {
        Self {
            backend,
            token_lifetime,
            tokens: Mutex::new(Tokens::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_users(&self) -> BTreeMap<String, StoredUser> {
        match self.backend.get(USERS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "User table unreadable, treating as empty");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read user table");
                BTreeMap::new()
            }
        }
    }

    fn save_users(&self, users: &BTreeMap<String, StoredUser>) -> Result<()> {
        self.backend.set(USERS_KEY, &serde_json::to_string(users)?)
    }

    fn issue(&self, username: &str) -> TokenPair {
        let token = random_token();
        let refresh_token = random_token();
        let mut tokens = self.lock();
        tokens.access.insert(
            token.clone(),
            IssuedToken {
                username: username.to_string(),
                expires_at: Utc::now() + self.token_lifetime,
            },
        );
        tokens
            .refresh
            .insert(refresh_token.clone(), username.to_string());
        TokenPair {
            token,
            refresh_token: Some(refresh_token),
        }
    }

    pub fn register(&self, request: &RegistrationRequest) -> Result<UserProfile, ApiError> {
        let key = request.username.to_lowercase();
        let mut users = self.load_users();
        if users.contains_key(&key) {
            return Err(ApiError::Conflict(format!("{} already exists", request.username)));
        }

        let password_hash =
            hash_password(&request.password).map_err(|e| ApiError::ServerError(e.to_string()))?;
        let profile = UserProfile {
            username: request.username.clone(),
            role: request.role,
            display_name: request.display_name.clone(),
            email: request.email.clone(),
        };
        users.insert(
            key,
            StoredUser {
                profile: profile.clone(),
                password_hash,
                created_at: Utc::now(),
            },
        );
        self.save_users(&users)
            .map_err(|e| ApiError::ServerError(format!("failed to save user: {}", e)))?;
        info!(username = %profile.username, role = %profile.role, "Host registered user");
        Ok(profile)
    }

    pub fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let users = self.load_users();
        let user = users
            .get(&request.username.trim().to_lowercase())
            .filter(|user| verify_password(&request.password, &user.password_hash))
            .ok_or(ApiError::Unauthorized)?;

        let tokens = self.issue(&user.profile.username);
        debug!(username = %user.profile.username, "Host login accepted");
        Ok(LoginResponse {
            token: tokens.token,
            refresh_token: tokens.refresh_token,
            session_id: Some(generate_session_id()),
            user: user.profile.clone(),
            expires_in: Some(self.token_lifetime.num_seconds()),
        })
    }

    pub fn logout(&self, token: &str) {
        let mut tokens = self.lock();
        if let Some(issued) = tokens.access.remove(token) {
            let username = issued.username;
            tokens.refresh.retain(|_, owner| *owner != username);
        }
    }

    pub fn validate(&self, token: &str) -> bool {
        let mut tokens = self.lock();
        match tokens.access.get(token) {
            Some(issued) if issued.expires_at > Utc::now() => true,
            Some(_) => {
                tokens.access.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn refresh(&self, token: &str, refresh_token: Option<&str>) -> Result<TokenPair, ApiError> {
        let username = {
            let mut tokens = self.lock();
            let username = match refresh_token {
                Some(refresh) => tokens.refresh.remove(refresh),
                None => tokens
                    .access
                    .get(token)
                    .filter(|issued| issued.expires_at > Utc::now())
                    .map(|issued| issued.username.clone()),
            };
            tokens.access.remove(token);
            username.ok_or(ApiError::Unauthorized)?
        };
        Ok(self.issue(&username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::storage::{FileKvBackend, MemoryKvBackend};

    fn registration(username: &str, password: &str) -> RegistrationRequest {
        RegistrationRequest {
            username: username.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
            role: Role::Teacher,
            display_name: Some("Ms. Teacher".to_string()),
            email: None,
        }
    }

    fn login(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            role: Role::Teacher,
            remember_me: false,
        }
    }

    #[test]
    fn test_register_then_login() {
        let store = CredentialStore::new(Arc::new(MemoryKvBackend::new()), Duration::hours(1));
        store.register(&registration("tara", "t4rapassword")).unwrap();

        assert!(matches!(
            store.login(&login("tara", "wrong")),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            store.login(&login("nobody", "t4rapassword")),
            Err(ApiError::Unauthorized)
        ));

        let response = store.login(&login("TARA", "t4rapassword")).unwrap();
        assert_eq!(response.user.display_name(), "Ms. Teacher");
        assert!(store.validate(&response.token));

        store.logout(&response.token);
        assert!(!store.validate(&response.token));
    }

    #[test]
    fn test_duplicate_registration() {
        let store = CredentialStore::new(Arc::new(MemoryKvBackend::new()), Duration::hours(1));
        store.register(&registration("tara", "t4rapassword")).unwrap();
        assert!(matches!(
            store.register(&registration("Tara", "t4rapassword")),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn test_expired_tokens_are_invalid() {
        let store = CredentialStore::new(Arc::new(MemoryKvBackend::new()), Duration::seconds(-1));
        store.register(&registration("tara", "t4rapassword")).unwrap();
        let response = store.login(&login("tara", "t4rapassword")).unwrap();
        assert!(!store.validate(&response.token));
    }

    #[test]
    fn test_refresh_with_refresh_token() {
        let store = CredentialStore::new(Arc::new(MemoryKvBackend::new()), Duration::hours(1));
        store.register(&registration("tara", "t4rapassword")).unwrap();
        let response = store.login(&login("tara", "t4rapassword")).unwrap();

        let pair = store
            .refresh(&response.token, response.refresh_token.as_deref())
            .unwrap();
        assert!(store.validate(&pair.token));
        assert!(!store.validate(&response.token));
        // Refresh tokens are single use
        assert!(store
            .refresh(&pair.token, response.refresh_token.as_deref())
            .is_err());
    }

    #[test]
    fn test_users_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        {
            let backend = Arc::new(FileKvBackend::open(&path).unwrap());
            let store = CredentialStore::new(backend, Duration::hours(1));
            store.register(&registration("tara", "t4rapassword")).unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("t4rapassword"));

        let backend = Arc::new(FileKvBackend::open(&path).unwrap());
        let store = CredentialStore::new(backend, Duration::hours(1));
        assert!(store.login(&login("tara", "t4rapassword")).is_ok());
    }
}
