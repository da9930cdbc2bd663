//! CLI commands

use altan_auth::{SessionController, SessionState};
use altan_core::{AvatarUpdate, Credentials, ProfileUpdate, RegisterRequest, UserProfile};
use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Subcommand;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session
    Login {
        /// Account email
        email: String,

        /// Account password
        #[arg(long, env = "ALTAN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account, then log into it
    Register {
        /// Account email
        email: String,

        /// Account password
        #[arg(long, env = "ALTAN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Repeat of the password, checked before anything is sent
        #[arg(long)]
        confirm_password: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        surname: Option<String>,
    },

    /// End the stored session
    Logout,

    /// Validate the stored session and print its user
    Whoami,

    /// Re-issue the stored access token
    Refresh,

    /// Update the logged in user's profile
    Update {
        /// Field assignment, repeatable. Values are parsed as JSON when they can be.
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        fields: Vec<(String, JsonValue)>,

        /// Image to upload as the new avatar
        #[arg(long, conflicts_with = "remove_avatar")]
        avatar_file: Option<PathBuf>,

        /// Remove the current avatar
        #[arg(long)]
        remove_avatar: bool,
    },

    /// Request a password reset
    ResetPassword {
        email: String,
    },

    /// Keep the session alive, printing state changes until interrupted
    Watch,

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to altan.toml in the data directory)
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show,
}

impl Commands {
    pub const fn is_long_running(&self) -> bool {
        matches!(self, Self::Watch)
    }

    pub async fn execute(self, data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
        if let Self::Config { command } = self {
            return command.execute(&data_dir, config_path.as_deref());
        }

        let config = config::load_config(&data_dir, config_path.as_deref())?;
        let session = config::open_session(config, &data_dir)?;

        match self {
            Self::Login { email, password } => login(&session, email, password).await,
            Self::Register {
                email,
                password,
                confirm_password,
                name,
                surname,
            } => {
                let mut request = RegisterRequest::new(email, password);
                if let Some(confirm) = confirm_password {
                    request = request.confirm_password(confirm);
                }
                if let Some(name) = name {
                    request = request.name(name);
                }
                if let Some(surname) = surname {
                    request = request.surname(surname);
                }
                let user = session.register(&request).await?;
                print_user(&user)
            }
            Self::Logout => {
                session.logout().await;
                println!("Logged out");
                Ok(())
            }
            Self::Whoami => match session.restore().await? {
                Some(user) => print_user(&user),
                None => bail!("Not logged in"),
            },
            Self::Refresh => {
                if session.restore().await?.is_none() {
                    bail!("Not logged in");
                }
                session.refresh_session().await?;
                println!("Access token refreshed");
                Ok(())
            }
            Self::Update {
                fields,
                avatar_file,
                remove_avatar,
            } => {
                let update = build_update(fields, avatar_file.as_deref(), remove_avatar)?;
                if update.is_empty() {
                    bail!("Nothing to update, pass --set, --avatar-file or --remove-avatar");
                }
                if session.restore().await?.is_none() {
                    bail!("Not logged in");
                }
                let user = session.update_profile(update).await?;
                print_user(&user)
            }
            Self::ResetPassword { email } => Ok(session.reset_password(&email).await?),
            Self::Watch => watch(&session).await,
            Self::Config { .. } => Ok(()),
        }
    }
}

impl ConfigCommands {
    pub fn execute(self, data_dir: &Path, config_path: Option<&Path>) -> Result<()> {
        match self {
            Self::Init { output } => {
                let path = output.unwrap_or_else(|| config::default_config_path(data_dir));
                if path.exists() {
                    bail!("Configuration file already exists: {}", path.display());
                }
                config::generate_default_config(&path)?;
                println!("Generated configuration at: {}", path.display());
                Ok(())
            }
            Self::Show => {
                let config = config::load_config(data_dir, config_path)?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}

async fn login(session: &SessionController, email: String, password: String) -> Result<()> {
    let user = session.login(&Credentials::new(email, password)).await?;
    info!("Session stored for user {}", user.id);
    print_user(&user)
}

async fn watch(session: &SessionController) -> Result<()> {
    if session.restore().await?.is_none() {
        bail!("Not logged in");
    }

    let mut changes = session.subscribe();
    print_state(&changes.borrow_and_update());
    info!(
        "Watching session, refreshing every {}s",
        session.config().refresh_interval_secs
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving session in place");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                print_state(&state);
                if !state.is_authenticated() && !state.is_loading {
                    break;
                }
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn build_update(
    fields: Vec<(String, JsonValue)>,
    avatar_file: Option<&Path>,
    remove_avatar: bool,
) -> Result<ProfileUpdate> {
    let mut update = fields
        .into_iter()
        .fold(ProfileUpdate::new(), |update, (key, value)| {
            update.set(key, value)
        });

    if let Some(path) = avatar_file {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read avatar file {}", path.display()))?;
        update = update.avatar(AvatarUpdate::Upload(STANDARD.encode(bytes)));
    } else if remove_avatar {
        update = update.avatar(AvatarUpdate::Remove);
    }

    Ok(update)
}

fn parse_assignment(raw: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field name cannot be empty".to_string());
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_user(user: &UserProfile) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

fn print_state(state: &SessionState) {
    match &state.user {
        Some(user) => println!("{:?}: {} (id {})", state.phase(), user.label(), user.id),
        None => match &state.last_error {
            Some(error) => println!("{:?}: {error}", state.phase()),
            None => println!("{:?}", state.phase()),
        },
    }
}
