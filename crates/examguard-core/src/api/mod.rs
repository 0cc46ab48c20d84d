//! HTTP client module for the exam backend.
//!
//! This module provides the `ApiClient` used by the HTTP authentication
//! backend and by offline-queue replay, and the `ApiError` type every backend
//! reports failures with.
//!
//! Authenticated requests carry the session token as a bearer token.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
