//! HTTP client for the Altan auth API
//!
//! Thin typed wrapper over `reqwest` whose request and response hooks keep
//! the persisted session in step with what the server says about the token.

pub mod client;

pub use client::error::ClientError;
pub use client::{AuthApiClient, AuthApiClientBuilder, UnauthorizedHook};
