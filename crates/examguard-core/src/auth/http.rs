//! REST backend.

use futures::future::{BoxFuture, FutureExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{AuthBackend, LoginRequest, LoginResponse, RegistrationRequest, TokenPair};
use crate::api::{ApiClient, ApiError};
use crate::session::UserProfile;

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

#[derive(Deserialize)]
struct RegisterResponse {
    user: UserProfile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

/// Talks to the exam backend over HTTPS.
pub struct HttpBackend {
    client: ApiClient,
}

impl HttpBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    async fn do_login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        debug!(username = %request.username, "HTTP login");
        self.client.post_json("/auth/login", request).await
    }

    async fn do_logout(&self, token: &str) -> Result<(), ApiError> {
        self.client
            .with_token(Some(token.to_string()))
            .send(Method::POST, "/auth/logout", None)
            .await
            .map(|_| ())
    }

    async fn do_validate(&self, token: &str) -> Result<bool, ApiError> {
        let client = self.client.with_token(Some(token.to_string()));
        match client
            .post_json::<_, ValidateResponse>("/auth/validate", &serde_json::json!({}))
            .await
        {
            Ok(response) => Ok(response.valid),
            Err(ApiError::Unauthorized) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn do_refresh(
        &self,
        token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenPair, ApiError> {
        self.client
            .with_token(Some(token.to_string()))
            .post_json("/auth/refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn do_register(&self, request: &RegistrationRequest) -> Result<UserProfile, ApiError> {
        let response: RegisterResponse = self.client.post_json("/auth/register", request).await?;
        Ok(response.user)
    }

    async fn do_ping(&self) -> bool {
        match self.client.send(Method::GET, "/health", None).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}

impl AuthBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<LoginResponse, ApiError>> {
        self.do_login(request).boxed()
    }

    fn logout<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), ApiError>> {
        self.do_logout(token).boxed()
    }

    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool, ApiError>> {
        self.do_validate(token).boxed()
    }

    fn refresh<'a>(
        &'a self,
        token: &'a str,
        refresh_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<TokenPair, ApiError>> {
        self.do_refresh(token, refresh_token).boxed()
    }

    fn register<'a>(
        &'a self,
        request: &'a RegistrationRequest,
    ) -> BoxFuture<'a, Result<UserProfile, ApiError>> {
        self.do_register(request).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        self.do_ping().boxed()
    }
}
