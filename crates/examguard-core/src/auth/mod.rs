//! Authentication module for logging users in and keeping them logged in.
//!
//! This module provides:
//! - `AuthGateway`: login, logout, token validation/refresh, registration
//! - `AuthBackend`: the strategy the gateway talks to, with `MockBackend`,
//!   `HttpBackend` and `IpcBackend` implementations chosen at startup
//! - `OfflineCredentials`: Argon2id verifiers that allow offline login
//!
//! Tokens only ever live in the secure store.

pub mod backend;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ipc;
pub mod mock;
pub mod offline;
pub mod password;
pub mod validation;

pub use backend::{AuthBackend, LoginRequest, LoginResponse, RegistrationRequest, TokenPair};
pub use error::AuthError;
pub use gateway::{AuthGateway, LoginSuccess};
pub use http::HttpBackend;
pub use ipc::IpcBackend;
pub use mock::MockBackend;
pub use offline::{OfflineCredential, OfflineCredentials, OfflineRejection};
