//! Credential checks that run before anything touches the network.

use super::{AuthError, RegistrationRequest};

/// Minimum length for usernames.
pub const MIN_USERNAME_LENGTH: usize = 3;

/// Maximum length for username input.
/// Usernames are often email addresses, 50 chars covers most.
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Minimum length for new passwords.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum length for password input.
/// 128 chars accommodates password managers and passphrases.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if a username character should be accepted
pub fn can_add_username_char(current_len: usize, c: char) -> bool {
    current_len < MAX_USERNAME_LENGTH && is_valid_input_char(c)
}

/// Check if a password character should be accepted
pub fn can_add_password_char(current_len: usize, c: char) -> bool {
    current_len < MAX_PASSWORD_LENGTH && is_valid_input_char(c)
}

/// Checks for a login attempt: both fields present, sane lengths.
pub fn validate_login(username: &str, password: &str) -> Result<(), AuthError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::Validation("Username and password required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AuthError::Validation("Username is too long".to_string()));
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::Validation("Password is too long".to_string()));
    }
    if username.chars().any(|c| !is_valid_input_char(c)) {
        return Err(AuthError::Validation("Username contains invalid characters".to_string()));
    }
    Ok(())
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-')
}

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let length = username.chars().count();
    if length < MIN_USERNAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "Username must be at least {} characters",
            MIN_USERNAME_LENGTH
        )));
    }
    if length > MAX_USERNAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username.chars().all(is_username_char) {
        return Err(AuthError::Validation(
            "Username may only contain letters, digits, '.', '_', '@' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Reject passwords that are short, single-class, or built from the username.
pub fn check_password_strength(password: &str, username: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::Validation("Password is too long".to_string()));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(AuthError::Validation(
            "Password must contain both letters and digits".to_string(),
        ));
    }
    let lower_password = password.to_lowercase();
    let lower_username = username.trim().to_lowercase();
    if !lower_username.is_empty() && lower_password.contains(&lower_username) {
        return Err(AuthError::Validation(
            "Password must not contain the username".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_registration(request: &RegistrationRequest) -> Result<(), AuthError> {
    validate_username(&request.username)?;
    check_password_strength(&request.password, &request.username)?;
    if request.password != request.confirm_password {
        return Err(AuthError::Validation("Passwords do not match".to_string()));
    }
    if let Some(ref email) = request.email {
        let valid = email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid {
            return Err(AuthError::Validation("Email address is not valid".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn request(username: &str, password: &str) -> RegistrationRequest {
        RegistrationRequest {
            username: username.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
            role: Role::Student,
            display_name: None,
            email: None,
        }
    }

    #[test]
    fn test_can_add_username_char() {
        assert!(can_add_username_char(0, 'a'));
        assert!(can_add_username_char(49, 'z'));
        assert!(!can_add_username_char(50, 'a'));
        assert!(!can_add_username_char(0, '\x00'));
        assert!(!can_add_username_char(0, '\n'));
    }

    #[test]
    fn test_can_add_password_char() {
        assert!(can_add_password_char(0, 'a'));
        assert!(can_add_password_char(127, '!'));
        assert!(!can_add_password_char(128, 'a'));
        assert!(!can_add_password_char(0, '\r'));
    }

    #[test]
    fn test_validate_login() {
        assert!(validate_login("alice", "pw").is_ok());
        assert!(validate_login("", "pw").is_err());
        assert!(validate_login("   ", "pw").is_err());
        assert!(validate_login("alice", "").is_err());
        assert!(validate_login(&"a".repeat(51), "pw").is_err());
        assert!(validate_login("ali\u{7}ce", "pw").is_err());
    }

    #[test]
    fn test_weak_passwords_rejected() {
        assert!(check_password_strength("short1", "alice").is_err());
        assert!(check_password_strength("lettersonly", "alice").is_err());
        assert!(check_password_strength("1234567890", "alice").is_err());
        assert!(check_password_strength("Alice2024!", "alice").is_err());
        assert!(check_password_strength("correct horse 9", "alice").is_ok());
    }

    #[test]
    fn test_validate_registration() {
        assert!(validate_registration(&request("alice", "s3cure-pass")).is_ok());
        assert!(validate_registration(&request("al", "s3cure-pass")).is_err());
        assert!(validate_registration(&request("alice smith", "s3cure-pass")).is_err());

        let mut mismatch = request("alice", "s3cure-pass");
        mismatch.confirm_password = "different1".to_string();
        assert!(validate_registration(&mismatch).is_err());

        let mut bad_email = request("alice", "s3cure-pass");
        bad_email.email = Some("not-an-email".to_string());
        assert!(validate_registration(&bad_email).is_err());
        bad_email.email = Some("alice@example.org".to_string());
        assert!(validate_registration(&bad_email).is_ok());
    }
}
