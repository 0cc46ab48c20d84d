use super::Role;

/// Lifecycle notifications emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created {
        session_id: String,
        username: String,
        role: Role,
        persistent: bool,
    },
    Restored {
        session_id: String,
        username: String,
        role: Role,
        persistent: bool,
    },
    /// The session is inside its warning window
    Expiring {
        session_id: String,
        remaining_secs: i64,
    },
    Expired {
        session_id: String,
    },
    Ended {
        session_id: String,
    },
    /// The backend (or local expiry) rejected the credential
    TokenExpired {
        session_id: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session_id, .. }
            | SessionEvent::Restored { session_id, .. }
            | SessionEvent::Expiring { session_id, .. }
            | SessionEvent::Expired { session_id }
            | SessionEvent::Ended { session_id }
            | SessionEvent::TokenExpired { session_id } => session_id,
        }
    }

    /// True for events after which the session no longer exists.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Expired { .. } | SessionEvent::Ended { .. } | SessionEvent::TokenExpired { .. }
        )
    }
}
