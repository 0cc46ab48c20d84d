//! Login, logout, validation, refresh and registration.
//!
//! The gateway owns no state of its own. Tokens go to the secure store,
//! sessions to the `SessionManager`, and reachability to `Connectivity`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::backend::{AuthBackend, LoginRequest, LoginResponse, RegistrationRequest};
use super::offline::{OfflineCredentials, OfflineRejection};
use super::validation::{validate_login, validate_registration};
use super::AuthError;
use crate::api::ApiError;
use crate::offline::Connectivity;
use crate::session::{Role, SessionManager, SessionOptions, UserProfile};
use crate::storage::{keys, SecureStore};

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: UserProfile,
    pub session_id: String,
    /// The backend was unreachable and a cached credential was used
    pub offline_login: bool,
}

pub struct AuthGateway {
    backend: Arc<dyn AuthBackend>,
    session: SessionManager,
    store: Arc<SecureStore>,
    offline: OfflineCredentials,
    connectivity: Connectivity,
}

impl AuthGateway {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        session: SessionManager,
        store: Arc<SecureStore>,
        connectivity: Connectivity,
        max_offline_age: Duration,
    ) -> Self {
        let offline = OfflineCredentials::new(Arc::clone(&store), max_offline_age);
        Self {
            backend,
            session,
            store,
            offline,
            connectivity,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn offline_credentials(&self) -> &OfflineCredentials {
        &self.offline
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        role: Role,
        remember_me: bool,
    ) -> Result<LoginSuccess, AuthError> {
        validate_login(username, password)?;
        let username = username.trim();

        if !self.connectivity.is_online() {
            debug!(username = %username, "Known offline, trying cached login");
            return self.offline_login(username, password, role, remember_me, "offline");
        }

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            role,
            remember_me,
        };
        match self.backend.login(&request).await {
            Ok(response) => self.complete_login(response, password, role, remember_me),
            Err(e) if e.is_transient() => {
                warn!(error = %e, backend = self.backend.name(), "Backend unreachable, trying cached login");
                self.connectivity.set_online(false);
                self.offline_login(username, password, role, remember_me, &e.to_string())
            }
            Err(e) if e.is_auth_failure() => {
                info!(username = %username, "Login rejected");
                Err(AuthError::InvalidCredentials)
            }
            Err(ApiError::BadRequest(message)) => Err(AuthError::Validation(message)),
            Err(e) => Err(e.into()),
        }
    }

    fn complete_login(
        &self,
        response: LoginResponse,
        password: &str,
        role: Role,
        remember_me: bool,
    ) -> Result<LoginSuccess, AuthError> {
        if response.user.role != role {
            warn!(
                username = %response.user.username,
                requested = %role,
                actual = %response.user.role,
                "Role mismatch on login"
            );
            return Err(AuthError::RoleMismatch { requested: role });
        }

        self.store_tokens(&response.token, response.refresh_token.as_deref())?;
        let session = self.session.create_session(
            &response.user,
            SessionOptions {
                persistent: remember_me,
                session_id: response.session_id,
                offline: false,
            },
        );
        if let Some(expires_in) = response.expires_in {
            debug!(expires_in, "Backend token lifetime");
        }

        if let Err(e) = self
            .offline
            .remember(&response.user, password, Some(&response.token))
        {
            warn!(error = %e, "Failed to cache offline credential");
        }
        self.connectivity.set_online(true);

        info!(username = %response.user.username, role = %role, "Logged in");
        Ok(LoginSuccess {
            user: response.user,
            session_id: session.session_id,
            offline_login: false,
        })
    }

    fn offline_login(
        &self,
        username: &str,
        password: &str,
        role: Role,
        remember_me: bool,
        reason: &str,
    ) -> Result<LoginSuccess, AuthError> {
        let credential = match self.offline.verify(username, password, role) {
            Ok(credential) => credential,
            Err(OfflineRejection::WrongPassword) => return Err(AuthError::InvalidCredentials),
            Err(OfflineRejection::RoleMismatch) => {
                return Err(AuthError::RoleMismatch { requested: role })
            }
            Err(rejection) => {
                debug!(username = %username, %rejection, "Cached login unavailable");
                return Err(AuthError::OfflineUnavailable(format!("{}; {}", reason, rejection)));
            }
        };

        warn!(
            username = %username,
            cached_at = %credential.cached_at,
            "Offline login from cached credential, server-side revocation not checked"
        );
        if let Some(ref token) = credential.token {
            self.store_tokens(token, None)?;
        }
        let session = self.session.create_session(
            &credential.user,
            SessionOptions {
                persistent: remember_me,
                session_id: None,
                offline: true,
            },
        );
        // Never outlive the cached credential
        let cap = credential.cached_at + self.offline.max_age();
        if self.session.expiry().is_some_and(|expiry| expiry > cap) {
            debug!(%cap, "Offline session capped at the credential's age limit");
            self.session.update_session_expiry(cap - Utc::now());
        }
        Ok(LoginSuccess {
            user: credential.user,
            session_id: session.session_id,
            offline_login: true,
        })
    }

    fn store_tokens(&self, token: &str, refresh_token: Option<&str>) -> Result<(), AuthError> {
        self.store
            .set(keys::AUTH_TOKEN, token)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let result = match refresh_token {
            Some(refresh) => self.store.set(keys::REFRESH_TOKEN, refresh),
            None => self.store.remove(keys::REFRESH_TOKEN),
        };
        result.map_err(|e| AuthError::Storage(e.to_string()))
    }

    /// End the session locally, then tell the backend without waiting.
    pub fn logout(&self) {
        let token = self.store.get(keys::AUTH_TOKEN);
        // Timers and listeners go first, whatever the backend does
        self.session.end_session();

        let Some(token) = token else {
            return;
        };
        if !self.connectivity.is_online() {
            debug!("Offline, skipping backend logout");
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime, skipping backend logout");
                return;
            }
        };
        let backend = Arc::clone(&self.backend);
        handle.spawn(async move {
            if let Err(e) = backend.logout(&token).await {
                debug!(error = %e, "Backend logout failed");
            }
        });
    }

    /// Whether the stored credential is still good. A credential that is
    /// found to be bad tears the session down with `TokenExpired`.
    pub async fn validate_token(&self) -> bool {
        let Some(token) = self.store.get(keys::AUTH_TOKEN) else {
            return false;
        };
        if self.session.current_session().is_none() {
            return false;
        }
        if !self.session.is_authenticated() {
            info!("Session expiry has passed");
            self.session.invalidate();
            return false;
        }
        if !self.connectivity.is_online() {
            return true;
        }

        match self.backend.validate(&token).await {
            Ok(true) => true,
            Ok(false) => {
                self.session.invalidate();
                false
            }
            Err(e) if e.is_auth_failure() => {
                self.session.invalidate();
                false
            }
            Err(e) => {
                if e.is_transient() {
                    self.connectivity.set_online(false);
                }
                warn!(error = %e, "Token validation unavailable, using local expiry");
                self.session.is_authenticated()
            }
        }
    }

    /// Ask the backend for a fresh token. Failure leaves the session alone
    /// so an exam in progress is not interrupted.
    pub async fn refresh_token(&self) -> bool {
        let Some(token) = self.store.get(keys::AUTH_TOKEN) else {
            return false;
        };
        let Some(session) = self.session.current_session() else {
            return false;
        };
        let refresh = self.store.get(keys::REFRESH_TOKEN);

        match self.backend.refresh(&token, refresh.as_deref()).await {
            Ok(pair) => {
                if let Err(e) = self.store_tokens(&pair.token, pair.refresh_token.as_deref()) {
                    warn!(error = %e, "Failed to store refreshed token");
                    return false;
                }
                let window = self.session.timeouts().window(session.persistent);
                self.session.update_session_expiry(window);
                debug!("Token refreshed");
                true
            }
            Err(e) => {
                if e.is_transient() {
                    self.connectivity.set_online(false);
                }
                warn!(error = %e, "Token refresh failed, keeping session");
                false
            }
        }
    }

    pub async fn register(&self, request: RegistrationRequest) -> Result<UserProfile, AuthError> {
        validate_registration(&request)?;
        if self.offline.knows(&request.username) {
            return Err(AuthError::Duplicate);
        }
        if !self.connectivity.is_online() {
            return Err(AuthError::Offline);
        }

        match self.backend.register(&request).await {
            Ok(user) => {
                info!(username = %user.username, role = %user.role, "Registered");
                Ok(user)
            }
            Err(ApiError::Conflict(_)) => Err(AuthError::Duplicate),
            Err(ApiError::BadRequest(message)) => Err(AuthError::Validation(message)),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Registration failed, backend unreachable");
                self.connectivity.set_online(false);
                Err(AuthError::Offline)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ping the backend and update connectivity. Returns the new state.
    pub async fn probe_connectivity(&self) -> bool {
        let online = self.backend.ping().await;
        self.connectivity.set_online(online);
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockBackend;
    use crate::session::{SessionEvent, SessionTimeouts};
    use crate::storage::{MemoryKvBackend, StorageKey};
    use chrono::Utc;

    struct Fixture {
        gateway: AuthGateway,
        backend: Arc<MockBackend>,
        store: Arc<SecureStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SecureStore::new(
            Arc::new(MemoryKvBackend::new()),
            &StorageKey::from_bytes([4u8; 32]),
        ));
        let backend = Arc::new(MockBackend::new());
        let session = SessionManager::new(Arc::clone(&store), SessionTimeouts::default());
        let connectivity = Connectivity::new(Arc::clone(&store), true);
        let gateway = AuthGateway::new(
            backend.clone(),
            session,
            Arc::clone(&store),
            connectivity,
            Duration::days(7),
        );
        Fixture {
            gateway,
            backend,
            store,
        }
    }

    fn registration(username: &str, password: &str) -> RegistrationRequest {
        RegistrationRequest {
            username: username.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
            role: Role::Student,
            display_name: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn test_mock_login_creates_session() {
        let f = fixture();
        let success = f
            .gateway
            .login("alice", "pw", Role::Student, false)
            .await
            .unwrap();
        assert!(!success.offline_login);
        assert!(f.gateway.session().is_authenticated());

        let session = f.gateway.session().current_session().unwrap();
        assert_eq!(session.role, Role::Student);
        assert_eq!(session.session_id, success.session_id);

        let token = f.store.get(keys::AUTH_TOKEN).unwrap();
        assert_ne!(token.as_bytes(), b"pw");
    }

    #[tokio::test]
    async fn test_login_as_each_role() {
        for role in [Role::Student, Role::Teacher] {
            let f = fixture();
            f.gateway.login("erin", "pw", role, true).await.unwrap();
            assert!(f.gateway.session().is_authenticated());
            assert_eq!(f.gateway.session().current_session().unwrap().role, role);
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend() {
        let f = fixture();
        f.backend.set_online(false);
        let err = f.gateway.login("", "pw", Role::Student, false).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        // A validation failure must not have touched connectivity
        assert!(f.gateway.connectivity().is_online());
    }

    #[tokio::test]
    async fn test_role_mismatch_rejected() {
        let f = fixture();
        let mut request = registration("frank", "fr4nkpass");
        request.role = Role::Teacher;
        f.gateway.register(request).await.unwrap();

        let err = f
            .gateway
            .login("frank", "fr4nkpass", Role::Student, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RoleMismatch { requested: Role::Student }));
        assert!(!f.gateway.session().is_authenticated());
        assert!(f.store.get(keys::AUTH_TOKEN).is_none());
    }

    #[tokio::test]
    async fn test_offline_login_uses_cached_credential() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        f.gateway.logout();

        f.backend.set_online(false);
        let success = f
            .gateway
            .login("alice", "pw", Role::Student, false)
            .await
            .unwrap();
        assert!(success.offline_login);
        assert!(!f.gateway.connectivity().is_online());
        assert!(f.gateway.session().current_session().unwrap().offline);

        f.gateway.logout();
        let err = f
            .gateway
            .login("alice", "wrong", Role::Student, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = f
            .gateway
            .login("alice", "pw", Role::Teacher, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RoleMismatch { .. }));
    }

    #[tokio::test]
    async fn test_offline_remember_me_bounded_by_offline_age() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, true).await.unwrap();
        let online_left = f.gateway.session().time_until_expiry().unwrap();
        assert!(online_left > Duration::days(29));
        f.gateway.logout();

        f.backend.set_online(false);
        let success = f.gateway.login("alice", "pw", Role::Student, true).await.unwrap();
        assert!(success.offline_login);
        let remaining = f.gateway.session().time_until_expiry().unwrap();
        assert!(remaining <= Duration::days(7));
        assert!(remaining > Duration::days(6));
        assert!(f.gateway.session().current_session().unwrap().persistent);
    }

    #[tokio::test]
    async fn test_offline_login_without_cache_fails() {
        let f = fixture();
        f.backend.set_online(false);
        let err = f
            .gateway
            .login("nobody", "pw", Role::Student, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OfflineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let f = fixture();
        let mut events = f.gateway.session().subscribe();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        f.gateway.logout();
        f.gateway.logout();

        assert!(!f.gateway.session().is_authenticated());
        assert!(f.store.get(keys::AUTH_TOKEN).is_none());
        assert!(f.store.get(keys::REFRESH_TOKEN).is_none());

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Created { .. }));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Ended { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_validate_after_local_expiry() {
        let f = fixture();
        let mut events = f.gateway.session().subscribe();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        assert!(f.gateway.validate_token().await);

        let past = Utc::now() - Duration::minutes(1);
        f.store.set(keys::SESSION_EXPIRY, &past.to_rfc3339()).unwrap();

        assert!(!f.gateway.validate_token().await);
        assert!(f.gateway.session().current_session().is_none());
        assert!(f.store.get(keys::AUTH_TOKEN).is_none());

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Created { .. }));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::TokenExpired { .. }));
    }

    #[tokio::test]
    async fn test_validate_revoked_token() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        f.backend.revoke_all();
        assert!(!f.gateway.validate_token().await);
        assert!(!f.gateway.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_validate_falls_back_to_local_expiry() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        f.backend.set_online(false);
        assert!(f.gateway.validate_token().await);
        assert!(!f.gateway.connectivity().is_online());
    }

    #[tokio::test]
    async fn test_validate_without_token() {
        let f = fixture();
        assert!(!f.gateway.validate_token().await);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        let before = f.store.get(keys::AUTH_TOKEN).unwrap();
        assert!(f.gateway.refresh_token().await);
        let after = f.store.get(keys::AUTH_TOKEN).unwrap();
        assert_ne!(before, after);
        assert!(f.gateway.validate_token().await);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_session() {
        let f = fixture();
        f.gateway.login("alice", "pw", Role::Student, false).await.unwrap();
        f.backend.set_online(false);
        assert!(!f.gateway.refresh_token().await);
        assert!(f.gateway.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_register_rejects_weak_and_duplicate() {
        let f = fixture();
        let err = f.gateway.register(registration("gina", "short")).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert!(!f.backend.is_registered("gina"));

        f.gateway.register(registration("gina", "g1napassword")).await.unwrap();
        let err = f
            .gateway
            .register(registration("gina", "g1napassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Duplicate));
    }

    #[tokio::test]
    async fn test_register_rejects_locally_known_username() {
        let f = fixture();
        f.gateway.login("hank", "pw", Role::Student, false).await.unwrap();
        let err = f
            .gateway
            .register(registration("hank", "h4nkpassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Duplicate));
        assert!(!f.backend.is_registered("hank"));
    }

    #[tokio::test]
    async fn test_register_requires_connectivity() {
        let f = fixture();
        f.gateway.connectivity().set_online(false);
        let err = f
            .gateway
            .register(registration("ivan", "iv4npassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Offline));
    }

    #[tokio::test]
    async fn test_probe_connectivity() {
        let f = fixture();
        f.backend.set_online(false);
        assert!(!f.gateway.probe_connectivity().await);
        assert!(!f.gateway.connectivity().is_online());
        f.backend.set_online(true);
        assert!(f.gateway.probe_connectivity().await);
    }
}
