//! Session lifecycle for a proctoring run.
//!
//! This module provides:
//! - `Session`, `UserProfile`, `Role`: the persisted session record
//! - `SessionManager`: creation, expiry timer, activity, teardown
//! - `SessionEvent`: lifecycle notifications for the UI and the host
//!
//! Sessions expire after 30 minutes of inactivity, or after 30 days when
//! created with "remember me".

pub mod events;
pub mod manager;
pub mod record;

pub use events::SessionEvent;
pub use manager::{SessionManager, SessionState, SessionTimeouts};
pub use record::{generate_session_id, Role, Session, SessionOptions, UserProfile};
