//! Session lifecycle for the Altan auth API
//!
//! [`SessionController`] logs users in and out, keeps the access token fresh
//! on a timer and mirrors the session into a [`KeyValueStorage`] namespace so
//! it survives restarts.
//!
//! [`KeyValueStorage`]: altan_core::KeyValueStorage

pub mod controller;
pub mod error;
pub mod refresh;
pub mod state;

pub use controller::{SessionController, SessionControllerBuilder};
pub use error::{AuthError, INVALID_CREDENTIALS};
pub use refresh::RefreshTimer;
pub use state::{AuthPhase, SessionState};
