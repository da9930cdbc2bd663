//! Session operation errors

use altan_core::CoreError;
use altan_http::ClientError;
use thiserror::Error;

/// Message shown for any rejected login, whichever field was wrong
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// Input rejected before any request was made
    #[error("{0}")]
    Validation(String),

    /// The backend refused the credentials
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The token was rejected; the session has been force-closed
    #[error("Session expired, please log in again")]
    Unauthorized,

    /// Non-2xx response, message taken from the backend when it gave one
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Transport or decoding failure
    #[error(transparent)]
    Client(ClientError),

    #[error("No user logged in")]
    NotLoggedIn,

    /// The session was ended or replaced while the request was in flight;
    /// its result was dropped
    #[error("Session changed while the request was in flight")]
    Superseded,

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Storage(#[from] CoreError),
}

impl AuthError {
    /// Map a client error, using `fallback` when the backend gave no message
    pub fn from_client(err: ClientError, fallback: &str) -> Self {
        if err.is_unauthorized() {
            return Self::Unauthorized;
        }
        match (err.status(), err.detail()) {
            (Some(status), Some(detail)) => Self::Server {
                status,
                message: if detail.trim().is_empty() {
                    fallback.to_string()
                } else {
                    detail.to_string()
                },
            },
            (Some(status), None) => Self::Server {
                status,
                message: fallback.to_string(),
            },
            _ => Self::Client(err),
        }
    }

    /// Map a failed login. Rejections become the generic credentials error;
    /// server-side failures keep their message.
    pub fn from_login(err: ClientError) -> Self {
        match err.status() {
            Some(400 | 401 | 403 | 404 | 422) => Self::InvalidCredentials,
            _ => Self::from_client(err, INVALID_CREDENTIALS),
        }
    }

    /// Whether this error should be recorded as the session's last error.
    /// Forced logouts are observed through the state itself instead.
    pub fn is_recorded(&self) -> bool {
        !matches!(
            self,
            Self::Unauthorized | Self::NotLoggedIn | Self::Superseded | Self::NotImplemented(_)
        )
    }
}

impl From<ClientError> for AuthError {
    fn from(err: ClientError) -> Self {
        Self::from_client(err, "Request failed")
    }
}
