//! The message vocabulary between the UI and the host process.
//!
//! Messages cross as a channel name plus a JSON payload. Only the names in
//! the two allow-lists below are ever delivered; the host decodes accepted
//! messages into `HostCommand` or `HostNotice` before acting on them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::ApiError;
use crate::auth::{LoginRequest, RegistrationRequest};

/// Channels that expect a reply.
pub const INVOKE_CHANNELS: &[&str] = &[
    "check-permission",
    "request-permission",
    "toggle-alt-tab-prevention",
    "force-check-recording",
    "auth:login",
    "auth:logout",
    "auth:validate",
    "auth:refresh",
    "auth:register",
    "get-guard-status",
];

/// Fire-and-forget channels.
pub const SEND_CHANNELS: &[&str] = &[
    "user-activity",
    "session-created",
    "session-restored",
    "session-expired",
    "session-ended",
];

pub fn is_invoke_channel(channel: &str) -> bool {
    INVOKE_CHANNELS.contains(&channel)
}

pub fn is_send_channel(channel: &str) -> bool {
    SEND_CHANNELS.contains(&channel)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PermissionKind {
    Camera,
    Microphone,
    Screen,
}

impl PermissionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Some(PermissionKind::Camera),
            "microphone" => Some(PermissionKind::Microphone),
            "screen" => Some(PermissionKind::Screen),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct PermissionPayload {
    permission: PermissionKind,
}

#[derive(Deserialize)]
struct TogglePayload {
    enabled: bool,
}

#[derive(Deserialize)]
struct TokenPayload {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    session_id: String,
    #[serde(default)]
    persistent: bool,
}

/// A decoded invoke request.
#[derive(Debug, Clone)]
pub enum HostCommand {
    CheckPermission(PermissionKind),
    RequestPermission(PermissionKind),
    ToggleAltTabPrevention(bool),
    ForceCheckRecording,
    Login(LoginRequest),
    Logout { token: String },
    Validate { token: String },
    Refresh { token: String, refresh_token: Option<String> },
    Register(RegistrationRequest),
    GuardStatus,
}

fn payload<T: serde::de::DeserializeOwned>(channel: &str, value: Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("bad payload on {}: {}", channel, e))
}

impl HostCommand {
    /// Decode an invoke. `Err` means the channel is unknown or the payload
    /// does not fit it.
    pub fn decode(channel: &str, value: Value) -> Result<Self, String> {
        let command = match channel {
            "check-permission" => {
                HostCommand::CheckPermission(payload::<PermissionPayload>(channel, value)?.permission)
            }
            "request-permission" => HostCommand::RequestPermission(
                payload::<PermissionPayload>(channel, value)?.permission,
            ),
            "toggle-alt-tab-prevention" => {
                HostCommand::ToggleAltTabPrevention(payload::<TogglePayload>(channel, value)?.enabled)
            }
            "force-check-recording" => HostCommand::ForceCheckRecording,
            "auth:login" => HostCommand::Login(payload(channel, value)?),
            "auth:logout" => HostCommand::Logout {
                token: payload::<TokenPayload>(channel, value)?.token,
            },
            "auth:validate" => HostCommand::Validate {
                token: payload::<TokenPayload>(channel, value)?.token,
            },
            "auth:refresh" => {
                let refresh: RefreshPayload = payload(channel, value)?;
                HostCommand::Refresh {
                    token: refresh.token,
                    refresh_token: refresh.refresh_token,
                }
            }
            "auth:register" => HostCommand::Register(payload(channel, value)?),
            "get-guard-status" => HostCommand::GuardStatus,
            other => return Err(format!("channel not allowed: {}", other)),
        };
        Ok(command)
    }
}

/// A decoded fire-and-forget message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotice {
    UserActivity,
    SessionCreated { session_id: String, persistent: bool },
    SessionRestored { session_id: String, persistent: bool },
    SessionExpired { session_id: String },
    SessionEnded { session_id: String },
}

impl HostNotice {
    pub fn channel(&self) -> &'static str {
        match self {
            HostNotice::UserActivity => "user-activity",
            HostNotice::SessionCreated { .. } => "session-created",
            HostNotice::SessionRestored { .. } => "session-restored",
            HostNotice::SessionExpired { .. } => "session-expired",
            HostNotice::SessionEnded { .. } => "session-ended",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            HostNotice::UserActivity => json!({}),
            HostNotice::SessionCreated {
                session_id,
                persistent,
            }
            | HostNotice::SessionRestored {
                session_id,
                persistent,
            } => json!({ "sessionId": session_id, "persistent": persistent }),
            HostNotice::SessionExpired { session_id }
            | HostNotice::SessionEnded { session_id } => json!({ "sessionId": session_id }),
        }
    }

    pub fn decode(channel: &str, value: Value) -> Result<Self, String> {
        let notice = match channel {
            "user-activity" => HostNotice::UserActivity,
            "session-created" => {
                let session: SessionPayload = payload(channel, value)?;
                HostNotice::SessionCreated {
                    session_id: session.session_id,
                    persistent: session.persistent,
                }
            }
            "session-restored" => {
                let session: SessionPayload = payload(channel, value)?;
                HostNotice::SessionRestored {
                    session_id: session.session_id,
                    persistent: session.persistent,
                }
            }
            "session-expired" => HostNotice::SessionExpired {
                session_id: payload::<SessionPayload>(channel, value)?.session_id,
            },
            "session-ended" => HostNotice::SessionEnded {
                session_id: payload::<SessionPayload>(channel, value)?.session_id,
            },
            other => return Err(format!("channel not allowed: {}", other)),
        };
        Ok(notice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFault {
    pub kind: String,
    pub message: String,
}

/// Reply envelope for invokes: `{ "ok": true, "data": ... }` or
/// `{ "ok": false, "error": { "kind": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HostFault>,
}

impl HostReply {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fault(kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(HostFault {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn from_error(error: &ApiError) -> Self {
        let kind = match error {
            ApiError::Unauthorized => "unauthorized",
            ApiError::AccessDenied(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::BadRequest(_) => "bad_request",
            _ => "internal",
        };
        Self::fault(kind, error.to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Turn a raw reply back into the error vocabulary the UI side uses.
    pub fn into_result(value: Value) -> Result<Value, ApiError> {
        let reply: HostReply = serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("malformed host reply: {}", e)))?;
        if reply.ok {
            return Ok(reply.data.unwrap_or(Value::Null));
        }
        let fault = reply.error.unwrap_or(HostFault {
            kind: "internal".to_string(),
            message: "host reported failure".to_string(),
        });
        Err(match fault.kind.as_str() {
            "unauthorized" => ApiError::Unauthorized,
            "forbidden" => ApiError::AccessDenied(fault.message),
            "not_found" => ApiError::NotFound(fault.message),
            "conflict" => ApiError::Conflict(fault.message),
            "bad_request" => ApiError::BadRequest(fault.message),
            _ => ApiError::ServerError(fault.message),
        })
    }
}
