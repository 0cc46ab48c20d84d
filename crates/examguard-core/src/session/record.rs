use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }

    /// The other role, for toggling in a login form.
    pub fn toggle(&self) -> Self {
        match self {
            Role::Student => Role::Teacher,
            Role::Teacher => Role::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A user as reported by an authentication backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
            display_name: None,
            email: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// The persisted session record. Expiry and last activity are kept under
/// their own keys so they can be updated without rewriting the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub persistent: bool,
    pub session_id: String,
    /// Created from cached credentials while the backend was unreachable
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// "Remember me": fixed long window, immune to inactivity
    pub persistent: bool,
    /// Backend-issued session id; one is generated when absent
    pub session_id: Option<String>,
    pub offline: bool,
}

/// Generate a random 128-bit session id as lowercase hex.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("student".parse::<Role>(), Ok(Role::Student));
        assert_eq!(" Teacher ".parse::<Role>(), Ok(Role::Teacher));
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(Role::Teacher.to_string(), "teacher");
        assert_eq!(Role::Student.toggle(), Role::Teacher);
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
    }

    #[test]
    fn test_session_without_offline_flag_parses() {
        let json = r#"{
            "username": "alice",
            "role": "student",
            "createdAt": "2026-01-01T00:00:00Z",
            "persistent": false,
            "sessionId": "abc"
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(!session.offline);
        assert_eq!(session.role, Role::Student);
    }

    #[test]
    fn test_generate_session_id() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let mut user = UserProfile::new("alice", Role::Student);
        assert_eq!(user.display_name(), "alice");
        user.display_name = Some("Alice A.".to_string());
        assert_eq!(user.display_name(), "Alice A.");
    }
}
