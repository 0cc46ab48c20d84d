//! Core library for examguard.
//!
//! This crate holds everything the proctoring front-ends share:
//!
//! - `storage`: encrypted, namespaced key-value persistence
//! - `session`: the session record, its expiry timer, and lifecycle events
//! - `auth`: the authentication gateway and its backend strategies
//! - `activity`: input-activity tracking that keeps a session alive
//! - `host`: the host-process guard set and its allow-listed channel
//! - `offline`: connectivity tracking and the offline operation queue
//! - `context`: per-process wiring of all of the above

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod host;
pub mod offline;
pub mod session;
pub mod storage;

pub use config::Config;
pub use context::AppContext;
