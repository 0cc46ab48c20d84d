//! Backend that relays every call to the host process's credential store.

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::backend::{AuthBackend, LoginRequest, LoginResponse, RegistrationRequest, TokenPair};
use crate::api::ApiError;
use crate::host::{HostBridge, HostReply};
use crate::session::UserProfile;

pub struct IpcBackend {
    bridge: HostBridge,
}

impl IpcBackend {
    pub fn new(bridge: HostBridge) -> Self {
        Self { bridge }
    }

    async fn call(&self, channel: &str, payload: Value) -> Result<Value, ApiError> {
        let reply = self
            .bridge
            .invoke(channel, payload)
            .await
            .ok_or_else(|| ApiError::Unreachable(format!("no reply on {}", channel)))?;
        HostReply::into_result(reply)
    }

    async fn call_as<T: DeserializeOwned>(&self, channel: &str, payload: Value) -> Result<T, ApiError> {
        let data = self.call(channel, payload).await?;
        serde_json::from_value(data)
            .map_err(|e| ApiError::InvalidResponse(format!("unexpected reply on {}: {}", channel, e)))
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
        serde_json::to_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to encode request: {}", e)))
    }

    async fn do_login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.call_as("auth:login", Self::encode(request)?).await
    }

    async fn do_logout(&self, token: &str) -> Result<(), ApiError> {
        self.call("auth:logout", json!({ "token": token })).await.map(|_| ())
    }

    async fn do_validate(&self, token: &str) -> Result<bool, ApiError> {
        let data = self.call("auth:validate", json!({ "token": token })).await?;
        Ok(data.get("valid").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn do_refresh(&self, token: &str, refresh_token: Option<&str>) -> Result<TokenPair, ApiError> {
        self.call_as(
            "auth:refresh",
            json!({ "token": token, "refreshToken": refresh_token }),
        )
        .await
    }

    async fn do_register(&self, request: &RegistrationRequest) -> Result<UserProfile, ApiError> {
        self.call_as("auth:register", Self::encode(request)?).await
    }
}

impl AuthBackend for IpcBackend {
    fn name(&self) -> &'static str {
        "ipc"
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

    /// The host is reachable as long as its task is running.
    fn ping(&self) -> BoxFuture<'_, bool> {
        async move { !self.bridge.is_closed() }.boxed()
    }
}
