//! Altan auth client core: session data model, storage and configuration

pub mod config;
pub mod error;
pub mod jwt;
pub mod storage;
pub mod types;
pub mod validation;

pub use config::{AuthenticationOptions, SessionConfig};
pub use error::{CoreError, CoreResult};
pub use storage::{
    DEFAULT_STORAGE_KEY, FileStorage, KeyValueStorage, MemoryStorage, SessionStore,
};
pub use types::{
    AvatarUpdate, Credentials, MediaObject, ProfileUpdate, RegisterRequest, TokenResponse,
    UserProfile,
};
pub use validation::{ValidateConfig, validators};
