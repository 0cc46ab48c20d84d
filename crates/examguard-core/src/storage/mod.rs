//! Encrypted local persistence.
//!
//! This module provides:
//! - `KvBackend`: the durable string map everything is written to
//! - `SecureStore`: authenticated encryption on top of a `KvBackend`
//! - `KeyProvider`: where the storage key lives (OS keychain or key file)
//!
//! Every persisted value in examguard goes through `SecureStore`. A value that
//! is missing or fails to decrypt is reported as absent, never as an error.

pub mod backend;
pub mod master_key;
pub mod secure;

pub use backend::{FileKvBackend, KvBackend, MemoryKvBackend};
pub use master_key::{
    forget_storage_key, resolve_storage_key, FileKeyProvider, KeyProvider, KeyringKeyProvider,
    StorageKey,
};
pub use secure::SecureStore;

/// Names of the entries examguard keeps in the secure store.
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const SESSION: &str = "session";
    pub const SESSION_ID: &str = "session_id";
    pub const SESSION_EXPIRY: &str = "session_expiry";
    pub const LAST_ACTIVITY: &str = "last_activity";
    pub const USER_ROLE: &str = "user_role";
    pub const REMEMBER_ME: &str = "remember_me";
    pub const LAST_ONLINE: &str = "last_online";
    pub const OFFLINE_CREDENTIALS: &str = "offline_credentials";
    pub const OFFLINE_QUEUE: &str = "offline_queue";
}
