//! Session client configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::storage::DEFAULT_STORAGE_KEY;
use crate::validation::{ValidateConfig, validators};

/// Session client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the auth API; endpoint paths such as `/auth/login` are appended
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Table whose users authenticate, sent as the `table_id` query parameter
    #[serde(default)]
    pub table_id: Option<String>,
    /// Storage namespace for the persisted user and token
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Options honoured by the provider
    #[serde(default)]
    pub authentication: AuthenticationOptions,
    /// Seconds between token refreshes while a user is logged in
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Per-request timeout in seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Provider options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationOptions {
    /// Keep the session across restarts
    #[serde(default = "default_true")]
    pub persist_session: bool,
    /// Where the embedding application sends unauthenticated users
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
}

fn default_base_url() -> String {
    "https://api.altan.ai/tables".to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_refresh_interval() -> u64 {
    25 * 60
}

fn default_true() -> bool {
    true
}

fn default_redirect_url() -> String {
    "/login".to_string()
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        Self {
            persist_session: default_true(),
            redirect_url: default_redirect_url(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            table_id: None,
            storage_key: default_storage_key(),
            authentication: AuthenticationOptions::default(),
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Configuration pointing at `base_url` with every other value defaulted
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from defaults, well-known files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&SessionConfig::default())?);

        let config_paths = ["altan.toml", "config/altan.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ALTAN")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, still overridable by environment
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Config::try_from(&SessionConfig::default())?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("ALTAN")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl ValidateConfig for SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validators::validate_http_url(&self.base_url, "base_url")?;
        validators::validate_not_empty(&self.storage_key, "storage_key")?;
        if let Some(table_id) = &self.table_id {
            validators::validate_not_empty(table_id, "table_id")?;
        }
        validators::validate_range(
            self.refresh_interval_secs,
            1,
            24 * 60 * 60,
            "refresh_interval_secs",
        )?;
        if let Some(timeout) = self.request_timeout_secs {
            validators::validate_range(timeout, 1, 600, "request_timeout_secs")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage_key, "auth_user");
        assert!(config.authentication.persist_session);
        assert_eq!(config.authentication.redirect_url, "/login");
        assert_eq!(config.refresh_interval(), Duration::from_secs(1500));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = SessionConfig::with_base_url("not-a-url");
        assert!(config.validate().is_err());

        config = SessionConfig::default();
        config.storage_key = "  ".to_string();
        assert!(config.validate().is_err());

        config = SessionConfig::default();
        config.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("altan.toml");
        std::fs::write(
            &path,
            r#"
base_url = "http://localhost:9000"
table_id = "tbl_1"
refresh_interval_secs = 60

[authentication]
persist_session = false
"#,
        )
        .unwrap();

        let config = SessionConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.table_id.as_deref(), Some("tbl_1"));
        assert_eq!(config.refresh_interval_secs, 60);
        assert!(!config.authentication.persist_session);
        assert_eq!(config.authentication.redirect_url, "/login");
        assert_eq!(config.storage_key, "auth_user");
    }
}
