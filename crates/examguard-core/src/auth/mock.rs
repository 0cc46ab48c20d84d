//! In-memory backend for mock data mode and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt};
use rand::RngCore;
use tracing::debug;

use super::backend::{AuthBackend, LoginRequest, LoginResponse, RegistrationRequest, TokenPair};
use super::password::{hash_password, verify_password};
use crate::api::ApiError;
use crate::session::{generate_session_id, UserProfile};

/// Prefix on every token this backend issues.
pub const MOCK_TOKEN_PREFIX: &str = "mock-";

struct MockUser {
    profile: UserProfile,
    verifier: String,
}

#[derive(Default)]
struct MockState {
    users: HashMap<String, MockUser>,
    /// token -> username
    tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
}

/// Accepts any non-empty credentials, except that registered users must
/// present their own password. Tokens are random and only valid here.
pub struct MockBackend {
    state: Mutex<MockState>,
    online: AtomicBool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Forget every issued token, as a server-side revocation would.
    pub fn revoke_all(&self) {
        let mut state = self.lock();
        state.tokens.clear();
        state.refresh_tokens.clear();
    }

    pub fn is_registered(&self, username: &str) -> bool {
        self.lock().users.contains_key(&username.to_lowercase())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Unreachable("mock backend is offline".to_string()))
        }
    }

    fn issue_tokens(state: &mut MockState, username: &str) -> TokenPair {
        let token = random_token();
        let refresh_token = random_token();
        state.tokens.insert(token.clone(), username.to_string());
        state
            .refresh_tokens
            .insert(refresh_token.clone(), username.to_string());
        TokenPair {
            token,
            refresh_token: Some(refresh_token),
        }
    }

    fn do_login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.check_online()?;
        if request.username.trim().is_empty() || request.password.is_empty() {
            return Err(ApiError::BadRequest("username and password required".to_string()));
        }

        let key = request.username.trim().to_lowercase();
        let mut state = self.lock();
        let user = match state.users.get(&key) {
            Some(user) if verify_password(&request.password, &user.verifier) => user.profile.clone(),
            Some(_) => return Err(ApiError::Unauthorized),
            None => UserProfile::new(request.username.trim(), request.role),
        };

        let tokens = Self::issue_tokens(&mut state, &key);
        debug!(username = %user.username, "Mock login accepted");
        Ok(LoginResponse {
            token: tokens.token,
            refresh_token: tokens.refresh_token,
            session_id: Some(generate_session_id()),
            user,
            expires_in: None,
        })
    }

    fn do_refresh(&self, token: &str, refresh_token: Option<&str>) -> Result<TokenPair, ApiError> {
        self.check_online()?;
        let mut state = self.lock();
        let username = match refresh_token {
            Some(refresh) => state.refresh_tokens.remove(refresh),
            None => state.tokens.get(token).cloned(),
        }
        .ok_or(ApiError::Unauthorized)?;
        state.tokens.remove(token);
        Ok(Self::issue_tokens(&mut state, &username))
    }

    fn do_register(&self, request: &RegistrationRequest) -> Result<UserProfile, ApiError> {
        self.check_online()?;
        let key = request.username.to_lowercase();
        let verifier = hash_password(&request.password)
            .map_err(|e| ApiError::ServerError(e.to_string()))?;

        let mut state = self.lock();
        if state.users.contains_key(&key) {
            return Err(ApiError::Conflict(format!("{} already exists", request.username)));
        }
        let profile = UserProfile {
            username: request.username.clone(),
            role: request.role,
            display_name: request.display_name.clone(),
            email: request.email.clone(),
        };
        state.users.insert(
            key,
            MockUser {
                profile: profile.clone(),
                verifier,
            },
        );
        Ok(profile)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", MOCK_TOKEN_PREFIX, hex)
}

impl AuthBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<LoginResponse, ApiError>> {
        future::ready(self.do_login(request)).boxed()
    }

    fn logout<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), ApiError>> {
        let result = self.check_online().map(|_| {
            self.lock().tokens.remove(token);
        });
        future::ready(result).boxed()
    }

    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool, ApiError>> {
        let result = self
            .check_online()
            .map(|_| self.lock().tokens.contains_key(token));
        future::ready(result).boxed()
    }

    fn refresh<'a>(
        &'a self,
        token: &'a str,
        refresh_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TokenPair, ApiError>> {
        future::ready(self.do_refresh(token, refresh_token)).boxed()
    }

    fn register<'a>(
        &'a self,
        request: &'a RegistrationRequest,
    ) -> BoxFuture<'a, Result<UserProfile, ApiError>> {
        future::ready(self.do_register(request)).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        future::ready(self.online.load(Ordering::SeqCst)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn login_request(username: &str, password: &str, role: Role) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            role,
            remember_me: false,
        }
    }

    fn registration(username: &str, password: &str, role: Role) -> RegistrationRequest {
        RegistrationRequest {
            username: username.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
            role,
            display_name: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn test_any_credentials_log_in() {
        let backend = MockBackend::new();
        let response = backend
            .login(&login_request("alice", "pw", Role::Student))
            .await
            .unwrap();
        assert!(response.token.starts_with(MOCK_TOKEN_PREFIX));
        assert_ne!(response.token, "pw");
        assert_eq!(response.user.role, Role::Student);
        assert!(backend.validate(&response.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_registered_user_needs_password() {
        let backend = MockBackend::new();
        backend
            .register(&registration("bob", "b0bspassword", Role::Teacher))
            .await
            .unwrap();

        let err = backend
            .login(&login_request("bob", "wrong", Role::Teacher))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        let response = backend
            .login(&login_request("BOB", "b0bspassword", Role::Student))
            .await
            .unwrap();
        // The registered role wins; the gateway decides what a mismatch means
        assert_eq!(response.user.role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let backend = MockBackend::new();
        let request = registration("carol", "c4rolpass", Role::Student);
        backend.register(&request).await.unwrap();
        let err = backend.register(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let backend = MockBackend::new();
        backend.set_online(false);
        assert!(!backend.ping().await);
        let err = backend
            .login(&login_request("alice", "pw", Role::Student))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let backend = MockBackend::new();
        let response = backend
            .login(&login_request("alice", "pw", Role::Student))
            .await
            .unwrap();
        let pair = backend
            .refresh(&response.token, response.refresh_token.as_deref())
            .await
            .unwrap();
        assert_ne!(pair.token, response.token);
        assert!(!backend.validate(&response.token).await.unwrap());
        assert!(backend.validate(&pair.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoked_tokens_fail_validation() {
        let backend = MockBackend::new();
        let response = backend
            .login(&login_request("alice", "pw", Role::Student))
            .await
            .unwrap();
        backend.revoke_all();
        assert!(!backend.validate(&response.token).await.unwrap());
        assert!(backend.logout(&response.token).await.is_ok());
    }
}
