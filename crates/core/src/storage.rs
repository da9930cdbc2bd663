//! Key/value persistence for session state
//!
//! [`KeyValueStorage`] plays the role browser local storage plays for a web
//! client. [`SessionStore`] namespaces it by a storage key: the user profile
//! lives under `{key}` and the raw access token under `{key}_token`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::types::UserProfile;

/// Default namespace for session entries
pub const DEFAULT_STORAGE_KEY: &str = "auth_user";

/// Synchronous string key/value store
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> CoreResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> CoreResult<()>;
    fn remove_item(&self, key: &str) -> CoreResult<()>;
}

/// Process-local storage. State does not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> CoreResult<Option<String>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> CoreResult<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object file
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half written file behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> CoreResult<Map<String, JsonValue>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            JsonValue::Object(map) => Ok(map),
            other => Err(CoreError::serialization(format!(
                "{} does not contain a JSON object: {other}",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, items: &Map<String, JsonValue>) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Wrote session storage to {}", self.path.display());
        Ok(())
    }

    /// Read-modify-write under the lock. A file that does not hold a JSON
    /// object is replaced rather than left to block every later write.
    fn update(&self, f: impl FnOnce(&mut Map<String, JsonValue>)) -> CoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = match self.read_all() {
            Ok(items) => items,
            Err(e @ CoreError::Serialization { .. }) => {
                warn!("Overwriting unreadable session storage: {}", e);
                Map::new()
            }
            Err(e) => return Err(e),
        };
        f(&mut items);
        self.write_all(&items)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> CoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> CoreResult<()> {
    Ok(())
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> CoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let items = self.read_all()?;
        Ok(items
            .get(key)
            .and_then(JsonValue::as_str)
            .map(ToString::to_string))
    }

    fn set_item(&self, key: &str, value: &str) -> CoreResult<()> {
        self.update(|items| {
            items.insert(key.to_string(), JsonValue::String(value.to_string()));
        })
    }

    fn remove_item(&self, key: &str) -> CoreResult<()> {
        self.update(|items| {
            items.remove(key);
        })
    }
}

/// Session entries of one storage namespace
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Store backed by fresh process-local memory
    pub fn in_memory(key: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token_key(&self) -> String {
        format!("{}_token", self.key)
    }

    /// Access token as currently stored
    pub fn token(&self) -> CoreResult<Option<String>> {
        Ok(self
            .storage
            .get_item(&self.token_key())?
            .filter(|token| !token.is_empty()))
    }

    pub fn set_token(&self, token: &str) -> CoreResult<()> {
        self.storage.set_item(&self.token_key(), token)
    }

    /// Cached user profile. An unreadable entry is dropped and reported absent.
    pub fn user(&self) -> CoreResult<Option<UserProfile>> {
        let Some(raw) = self.storage.get_item(&self.key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!("Discarding unreadable stored user under '{}': {}", self.key, e);
                self.storage.remove_item(&self.key)?;
                Ok(None)
            }
        }
    }

    pub fn save_user(&self, user: &UserProfile) -> CoreResult<()> {
        let serialized = serde_json::to_string(user)?;
        self.storage.set_item(&self.key, &serialized)
    }

    /// Remove both the user and the token
    pub fn clear(&self) -> CoreResult<()> {
        self.storage.remove_item(&self.key)?;
        self.storage.remove_item(&self.token_key())
    }
}
