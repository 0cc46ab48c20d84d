use thiserror::Error;

use crate::api::ApiError;
use crate::session::Role;

/// Errors surfaced to whoever drives the login form.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("This account is not registered as a {requested}")]
    RoleMismatch { requested: Role },

    #[error("Username is already taken")]
    Duplicate,

    #[error("Registration requires an internet connection")]
    Offline,

    #[error("Unable to reach the server and no offline login is available: {0}")]
    OfflineUnavailable(String),

    #[error("Could not save credentials: {0}")]
    Storage(String),

    #[error("Server error: {0}")]
    Backend(#[from] ApiError),
}

impl AuthError {
    /// A short message suitable for a status line.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Backend(ApiError::NetworkError(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            AuthError::Backend(e) if e.is_transient() => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::OfflineUnavailable(_) => {
                "Unable to connect to server, and this account has not logged in here recently."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(
            AuthError::InvalidCredentials.user_message(),
            "Invalid username or password"
        );
        assert_eq!(
            AuthError::RoleMismatch { requested: Role::Teacher }.user_message(),
            "This account is not registered as a teacher"
        );
        assert!(AuthError::Backend(ApiError::Unreachable("x".into()))
            .user_message()
            .contains("internet connection"));
        assert!(AuthError::OfflineUnavailable("down".into())
            .user_message()
            .contains("not logged in here recently"));
    }
}
