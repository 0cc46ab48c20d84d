//! The seam between the gateway and whoever actually checks credentials.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::session::{Role, UserProfile};

/// Login request body.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub remember_me: bool,
}

// Keep passwords out of logs
impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("role", &self.role)
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub user: UserProfile,
    /// Token lifetime in seconds, when the backend says.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("role", &self.role)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .finish()
    }
}

/// A source of authentication decisions.
///
/// Implementations report transport problems as transient `ApiError`s so the
/// gateway can fall back to offline behaviour. A rejected credential is
/// `ApiError::Unauthorized`.
pub trait AuthBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<LoginResponse, ApiError>>;

    fn logout<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Whether the backend still honours `token`.
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool, ApiError>>;

    fn refresh<'a>(
        &'a self,
        token: &'a str,
        refresh_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TokenPair, ApiError>>;

    fn register<'a>(
        &'a self,
        request: &'a RegistrationRequest,
    ) -> BoxFuture<'a, Result<UserProfile, ApiError>>;

    /// Cheap reachability check.
    fn ping(&self) -> BoxFuture<'_, bool>;
}
