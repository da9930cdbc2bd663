//! Session controller
//!
//! Owns the one session of a storage namespace. Every mutation goes through
//! the controller or through the 401 hook it installs on its API client, and
//! is persisted before it is published on the state channel.
//!
//! Sessions are numbered. Starting or ending one bumps the generation, and a
//! request that began under an older generation may no longer write.

use crate::error::AuthError;
use crate::refresh::RefreshTimer;
use crate::state::{AuthPhase, SessionState};
use altan_core::{
    Credentials, KeyValueStorage, MemoryStorage, ProfileUpdate, RegisterRequest, SessionConfig,
    SessionStore, UserProfile, ValidateConfig, jwt, validators,
};
use altan_http::AuthApiClient;
use serde_json::Value as JsonValue;
use std::ops::ControlFlow;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

const REGISTRATION_FAILED: &str = "Registration failed";
const PROFILE_UPDATE_FAILED: &str = "Profile update failed";
const REFRESH_FAILED: &str = "Token refresh failed";

/// State reachable from the 401 hook, which lives inside the API client
struct Shared {
    state: watch::Sender<SessionState>,
    timer: RefreshTimer,
    store: SessionStore,
    generation: std::sync::Mutex<u64>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(f);
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Start a new session generation and return it
    fn next_generation(&self) -> u64 {
        let mut generation = self.lock_generation();
        *generation += 1;
        *generation
    }

    /// Run `write` only if the session is still the one seen as `seen`.
    /// The generation stays locked while it runs.
    fn commit<T>(
        &self,
        seen: u64,
        write: impl FnOnce() -> Result<T, AuthError>,
    ) -> Result<T, AuthError> {
        let generation = self.lock_generation();
        if *generation != seen {
            return Err(AuthError::Superseded);
        }
        let result = write();
        drop(generation);
        result
    }

    /// End the session: stop the timer, clear storage and reset the state
    fn end(&self, reset: impl FnOnce(&mut SessionState)) {
        let mut generation = self.lock_generation();
        self.end_locked(&mut generation, reset);
    }

    /// End the session unless another one already replaced `seen`
    fn end_if(&self, seen: u64) {
        let mut generation = self.lock_generation();
        if *generation == seen {
            self.end_locked(&mut generation, SessionState::clear);
        } else {
            debug!("Session already replaced, nothing to end");
        }
    }

    fn end_locked(&self, generation: &mut u64, reset: impl FnOnce(&mut SessionState)) {
        *generation += 1;
        self.timer.stop();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored session: {}", e);
        }
        self.update(reset);
    }

    fn force_logout(&self) {
        self.end(SessionState::clear);
    }

    fn record_failure(&self, err: &AuthError) {
        self.update(|s| {
            s.is_loading = false;
            if err.is_recorded() {
                s.last_error = Some(err.to_string());
            }
        });
    }
}

struct Inner {
    client: AuthApiClient,
    shared: Arc<Shared>,
    refresh_lock: Mutex<()>,
    config: SessionConfig,
}

/// Handle to a session. Clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("client", &self.inner.client)
            .field("timer", &self.inner.shared.timer)
            .field("state", &*self.inner.shared.state.borrow())
            .finish()
    }
}

impl SessionController {
    /// Controller with in-memory storage
    pub fn new(config: SessionConfig) -> Result<Self, AuthError> {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionConfig) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            storage: None,
            refresh_interval: None,
            user_agent: None,
        }
    }

    /// Log in with email and password, then load and persist the profile
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, AuthError> {
        let shared = &self.inner.shared;
        let generation = shared.next_generation();
        shared.update(SessionState::begin);
        debug!("Logging in as {}", credentials.email);

        match self.authenticate(credentials, generation).await {
            Ok(user) => {
                info!("Logged in as {}", user.label());
                Ok(user)
            }
            Err(err) => {
                warn!("Login failed: {}", err);
                shared.end_if(generation);
                shared.record_failure(&err);
                Err(err)
            }
        }
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        generation: u64,
    ) -> Result<UserProfile, AuthError> {
        let Inner { client, shared, .. } = &*self.inner;

        let token = client
            .login(credentials)
            .await
            .map_err(AuthError::from_login)?;
        shared.commit(generation, || {
            shared
                .store
                .set_token(&token.access_token)
                .map_err(AuthError::from)
        })?;

        let payload = client.me().await.map_err(AuthError::from_login)?;
        let user = UserProfile::from_payload(&payload)?;

        shared.commit(generation, || {
            shared.store.save_user(&user)?;
            shared.update(|s| s.authenticate(user.clone(), Some(token.access_token.clone())));
            self.start_refresh();
            Ok(())
        })?;
        Ok(user)
    }

    /// End the session. The server call is best effort; local state is always
    /// cleared.
    pub async fn logout(&self) {
        let Inner { client, shared, .. } = &*self.inner;

        if let Err(e) = client.logout().await {
            warn!("Logout request failed, clearing local session anyway: {}", e);
        }

        shared.end(|s| *s = SessionState::default());
        info!("Logged out");
    }

    /// Create an account and log into it
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AuthError> {
        let shared = &self.inner.shared;

        if let Err(err) = validate_registration(request) {
            shared.record_failure(&err);
            return Err(err);
        }

        shared.update(SessionState::begin);
        if let Err(e) = self.inner.client.register(request).await {
            let err = AuthError::from_client(e, REGISTRATION_FAILED);
            warn!("Registration failed: {}", err);
            shared.record_failure(&err);
            return Err(err);
        }

        info!("Registered {}", request.email);
        self.login(&request.credentials()).await
    }

    /// Re-issue the access token. Logs out when the server refuses.
    ///
    /// A new token that arrives after the session ended is dropped.
    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let Inner {
            client,
            shared,
            refresh_lock,
            ..
        } = &*self.inner;

        let Some(seen) = client.current_token() else {
            debug!("No stored token, skipping refresh");
            return Ok(());
        };

        let _guard = refresh_lock.lock().await;
        let generation = shared.generation();
        match client.current_token() {
            None => return Ok(()),
            Some(current) if current != seen => {
                debug!("Token rotated by a concurrent refresh");
                return Ok(());
            }
            Some(_) => {}
        }

        match client.refresh().await {
            Ok(token) => {
                let committed = shared.commit(generation, || {
                    shared.store.set_token(&token.access_token)?;
                    shared.update(|s| s.access_token = Some(token.access_token.clone()));
                    Ok(())
                });
                match committed {
                    Ok(()) => debug!("Access token refreshed"),
                    Err(AuthError::Superseded) => {
                        debug!("Session ended during refresh, dropping the new token");
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed, logging out: {}", e);
                if shared.generation() == generation {
                    self.logout().await;
                }
                Err(AuthError::from_client(e, REFRESH_FAILED))
            }
        }
    }

    /// Apply a partial profile update and cache the user the server returns
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, AuthError> {
        let shared = &self.inner.shared;

        let logged_in = shared.state.borrow().user.is_some();
        if !logged_in {
            return Err(AuthError::NotLoggedIn);
        }

        let generation = shared.generation();
        shared.update(SessionState::begin);
        match self.apply_update(update, generation).await {
            Ok(user) => {
                debug!("Profile updated for {}", user.label());
                Ok(user)
            }
            Err(err) => {
                warn!("Profile update failed: {}", err);
                shared.record_failure(&err);
                Err(err)
            }
        }
    }

    async fn apply_update(
        &self,
        update: ProfileUpdate,
        generation: u64,
    ) -> Result<UserProfile, AuthError> {
        let Inner { client, shared, .. } = &*self.inner;

        let body = update.into_body()?;
        let payload = client
            .update_profile(&body)
            .await
            .map_err(|e| AuthError::from_client(e, PROFILE_UPDATE_FAILED))?;
        let user = UserProfile::from_payload(updated_user(&payload))?;

        shared.commit(generation, || {
            shared.store.save_user(&user)?;
            shared.update(|s| {
                s.user = Some(user.clone());
                s.is_loading = false;
            });
            Ok(())
        })?;
        Ok(user)
    }

    /// Validate a persisted session against the server.
    ///
    /// Returns the user when the stored token is still accepted. Expired,
    /// rejected or unreadable sessions are cleared and yield `Ok(None)`.
    pub async fn restore(&self) -> Result<Option<UserProfile>, AuthError> {
        let Inner { client, shared, .. } = &*self.inner;
        let generation = shared.generation();

        let token = match shared.store.token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No stored session to restore");
                shared.end_if(generation);
                return Ok(None);
            }
            Err(e) => {
                warn!("Unreadable stored session, clearing it: {}", e);
                shared.end_if(generation);
                return Ok(None);
            }
        };

        if jwt::is_expired(&token) {
            info!("Stored access token has expired, clearing session");
            shared.end_if(generation);
            return Ok(None);
        }

        shared.update(|s| s.is_loading = true);
        let user = match client.me().await {
            Ok(payload) => UserProfile::from_payload(&payload).map_err(AuthError::from),
            Err(e) => Err(AuthError::from(e)),
        };

        let restored = user.and_then(|user| {
            shared.commit(generation, || {
                shared.store.save_user(&user)?;
                shared.update(|s| s.authenticate(user.clone(), Some(token.clone())));
                self.start_refresh();
                Ok(user.clone())
            })
        });

        match restored {
            Ok(user) => {
                info!("Restored session for {}", user.label());
                Ok(Some(user))
            }
            Err(AuthError::Superseded) => {
                debug!("Session changed while restoring, leaving it alone");
                Ok(None)
            }
            Err(e) => {
                warn!("Stored session rejected: {}", e);
                shared.end_if(generation);
                Ok(None)
            }
        }
    }

    /// Password reset is not offered by the backend
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        debug!("Password reset requested for {}", email);
        Err(AuthError::NotImplemented("password reset"))
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state.borrow().clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.shared.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.shared.state.borrow().is_authenticated()
    }

    pub fn phase(&self) -> AuthPhase {
        self.inner.shared.state.borrow().phase()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Underlying API client, sharing this session's token
    pub fn api(&self) -> &AuthApiClient {
        &self.inner.client
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.shared.timer.is_running()
    }

    /// Stop background work. The session itself is left as is.
    pub fn shutdown(&self) {
        debug!("Shutting down session controller");
        self.inner.shared.timer.stop();
    }

    fn start_refresh(&self) {
        let weak = Arc::downgrade(&self.inner);
        debug!(
            "Scheduling token refresh every {:?}",
            self.inner.shared.timer.period()
        );

        self.inner.shared.timer.start(move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match (SessionController { inner }).refresh_session().await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        warn!("Scheduled token refresh failed: {}", e);
                        ControlFlow::Break(())
                    }
                }
            }
        });
    }
}

/// The update endpoint answers either `{"user": {...}}` or the bare user
fn updated_user(payload: &JsonValue) -> &JsonValue {
    payload
        .get("user")
        .filter(|user| user.is_object())
        .unwrap_or(payload)
}

fn validate_registration(request: &RegisterRequest) -> Result<(), AuthError> {
    if request.email.trim().is_empty() {
        return Err(AuthError::Validation("Email is required".into()));
    }
    if validators::validate_email(request.email.trim(), "email").is_err() {
        return Err(AuthError::Validation("Invalid email address".into()));
    }
    if request.password.is_empty() {
        return Err(AuthError::Validation("Password is required".into()));
    }
    if let Some(confirm) = &request.confirm_password {
        if *confirm != request.password {
            return Err(AuthError::Validation("Passwords don't match".into()));
        }
    }
    Ok(())
}

/// Builder for SessionController
pub struct SessionControllerBuilder {
    config: SessionConfig,
    storage: Option<Arc<dyn KeyValueStorage>>,
    refresh_interval: Option<Duration>,
    user_agent: Option<String>,
}

impl SessionControllerBuilder {
    /// Backing store for the session. Ignored when `persist_session` is off.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the configured refresh period
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// User agent sent with every API request
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<SessionController, AuthError> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let storage: Arc<dyn KeyValueStorage> = match self.storage {
            Some(storage) if config.authentication.persist_session => storage,
            _ => Arc::new(MemoryStorage::new()),
        };
        let store = SessionStore::new(storage, config.storage_key.clone());

        let initial = match (store.token(), store.user()) {
            (Ok(Some(token)), Ok(user)) => SessionState::restoring(user, token),
            (Ok(None), Ok(_)) => SessionState::default(),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Unreadable stored session, starting signed out: {}", e);
                if let Err(e) = store.clear() {
                    warn!("Failed to clear unreadable session: {}", e);
                }
                SessionState::default()
            }
        };
        let period = self
            .refresh_interval
            .unwrap_or_else(|| config.refresh_interval());
        let shared = Arc::new(Shared {
            state: watch::channel(initial).0,
            timer: RefreshTimer::new(period),
            store: store.clone(),
            generation: std::sync::Mutex::new(0),
        });

        let mut client = AuthApiClient::builder()
            .base_url(config.base_url.clone())
            .store(store)
            .on_unauthorized({
                let shared = Arc::clone(&shared);
                move || {
                    warn!("Access token rejected, ending session");
                    shared.force_logout();
                }
            });
        if let Some(table_id) = &config.table_id {
            client = client.table_id(table_id.clone());
        }
        if let Some(timeout) = config.request_timeout() {
            client = client.timeout(timeout);
        }
        if let Some(agent) = self.user_agent {
            client = client.user_agent(agent);
        }
        let client = client.build()?;

        Ok(SessionController {
            inner: Arc::new(Inner {
                client,
                shared,
                refresh_lock: Mutex::new(()),
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registration_is_checked_locally() {
        let mismatch = RegisterRequest::new("a@x.com", "pw").confirm_password("other");
        assert_eq!(
            validate_registration(&mismatch).unwrap_err().to_string(),
            "Passwords don't match"
        );

        let no_email = RegisterRequest::new(" ", "pw");
        assert!(matches!(
            validate_registration(&no_email),
            Err(AuthError::Validation(_))
        ));

        let malformed = RegisterRequest::new("not-an-address", "pw");
        assert_eq!(
            validate_registration(&malformed).unwrap_err().to_string(),
            "Invalid email address"
        );

        let ok = RegisterRequest::new("a@x.com", "pw").confirm_password("pw");
        assert!(validate_registration(&ok).is_ok());
    }

    #[test]
    fn update_response_shapes() {
        let wrapped = json!({"user": {"id": 1}, "status": "ok"});
        assert_eq!(updated_user(&wrapped), &json!({"id": 1}));

        let bare = json!({"id": 2, "user": "handle"});
        assert_eq!(updated_user(&bare), &bare);
    }

    #[tokio::test]
    async fn persisted_session_starts_loading() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone(), "auth_user");
        store.set_token("T").unwrap();
        store
            .save_user(&UserProfile {
                id: 1,
                ..UserProfile::default()
            })
            .unwrap();

        let controller = SessionController::builder(SessionConfig::default())
            .storage(storage)
            .build()
            .unwrap();

        assert_eq!(controller.phase(), AuthPhase::Loading);
        assert_eq!(controller.state().access_token.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn memory_only_when_not_persisting() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        SessionStore::new(storage.clone(), "auth_user")
            .set_token("T")
            .unwrap();

        let mut config = SessionConfig::default();
        config.authentication.persist_session = false;
        let controller = SessionController::builder(config)
            .storage(storage)
            .build()
            .unwrap();

        assert_eq!(controller.phase(), AuthPhase::Unauthenticated);
        assert_eq!(controller.api().current_token(), None);
    }

    #[tokio::test]
    async fn reset_password_is_not_implemented() {
        let controller = SessionController::new(SessionConfig::default()).unwrap();
        let err = controller.reset_password("a@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::NotImplemented(_)));
        assert_eq!(controller.state().last_error, None);
    }

    #[tokio::test]
    async fn update_requires_a_user() {
        let controller = SessionController::new(SessionConfig::default()).unwrap();
        let err = controller
            .update_profile(ProfileUpdate::new().set("name", "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotLoggedIn));
        assert_eq!(controller.phase(), AuthPhase::Unauthenticated);
    }
}
