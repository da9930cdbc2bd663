//! CLI configuration utilities

use altan_auth::SessionController;
use altan_core::{FileStorage, SessionConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE: &str = "altan.toml";
const SESSION_FILE: &str = "session.json";
const USER_AGENT: &str = concat!("altan-cli/", env!("CARGO_PKG_VERSION"));

/// Data directory: `ALTAN_STATE_DIR`, else the platform data dir
pub fn default_data_dir() -> PathBuf {
    if let Ok(state_dir) = std::env::var("ALTAN_STATE_DIR") {
        PathBuf::from(state_dir)
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("altan")
    }
}

pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILE)
}

/// Load the session configuration.
///
/// An explicit path must exist. Otherwise the data directory's config file is
/// used when present, falling back to the working directory and environment.
pub fn load_config(data_dir: &Path, explicit: Option<&Path>) -> Result<SessionConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| Some(default_config_path(data_dir)).filter(|p| p.exists()));

    match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            let name = path
                .to_str()
                .with_context(|| format!("Non UTF-8 config path: {}", path.display()))?;
            SessionConfig::load_from_file(name)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            info!("Using default configuration with environment overrides");
            SessionConfig::load().context("Failed to load configuration")
        }
    }
}

/// Controller whose session persists in the data directory
pub fn open_session(config: SessionConfig, data_dir: &Path) -> Result<SessionController> {
    let storage = FileStorage::new(session_path(data_dir));
    debug!("Session storage at {}", storage.path().display());
    SessionController::builder(config)
        .storage(Arc::new(storage))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create session controller")
}

/// Write the default configuration as TOML
pub fn generate_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(&SessionConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
