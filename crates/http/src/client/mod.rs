//! Altan auth API client
//!
//! Every request goes through two hooks:
//!
//! - on the way out, the access token is read from the [`SessionStore`] at
//!   request time and attached as a bearer token, so a token renewed by
//!   another caller is picked up without rebuilding the client;
//! - on the way back, a 401 clears the stored session and notifies the
//!   registered unauthorized callback before the error reaches the caller.
//!
//! The client never retries.

pub mod auth;
pub mod error;

use altan_core::{DEFAULT_STORAGE_KEY, SessionStore};
use error::ClientError;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback run after a 401 has cleared the stored session
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

const DEFAULT_USER_AGENT: &str = concat!("altan-auth-client/", env!("CARGO_PKG_VERSION"));

/// Auth API client bound to one storage namespace
#[derive(Clone)]
pub struct AuthApiClient {
    client: Client,
    base_url: String,
    table_id: Option<String>,
    store: SessionStore,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl std::fmt::Debug for AuthApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApiClient")
            .field("base_url", &self.base_url)
            .field("table_id", &self.table_id)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthApiClient {
    /// Create a client with in-memory session storage
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> AuthApiClientBuilder {
        AuthApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn table_id(&self) -> Option<&str> {
        self.table_id.as_deref()
    }

    /// Storage namespace the request hook reads the token from
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Token the next request will carry
    pub fn current_token(&self) -> Option<String> {
        match self.store.token() {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to read access token from storage: {}", e);
                None
            }
        }
    }

    /// Create a request builder carrying the table id and the stored token
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, url);

        if let Some(table_id) = &self.table_id {
            request = request.query(&[("table_id", table_id)]);
        }

        if let Some(token) = self.current_token() {
            request = request.bearer_auth(token);
        }

        request
    }

    /// Execute a request and decode the JSON body
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    /// Execute a request whose response body is irrelevant
    pub async fn execute_empty(&self, request: reqwest::RequestBuilder) -> Result<(), ClientError> {
        self.send(request).await.map(drop)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("Request failed with status {}: {}", status, body);

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
        }

        Err(ClientError::from_status(status, &body))
    }

    fn handle_unauthorized(&self) {
        info!(
            "Received 401, clearing stored session '{}'",
            self.store.key()
        );
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored session after 401: {}", e);
        }
        if let Some(hook) = &self.on_unauthorized {
            hook();
        }
    }
}

/// Builder for AuthApiClient
#[derive(Default)]
pub struct AuthApiClientBuilder {
    base_url: Option<String>,
    table_id: Option<String>,
    store: Option<SessionStore>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl AuthApiClientBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Scope every request to a table
    #[must_use]
    pub fn table_id(mut self, table_id: impl Into<String>) -> Self {
        self.table_id = Some(table_id.into());
        self
    }

    /// Set the storage namespace the token is read from and cleared in
    #[must_use]
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Run `hook` whenever a response comes back 401
    #[must_use]
    pub fn on_unauthorized(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    /// Build the client
    pub fn build(self) -> Result<AuthApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base_url is empty".into()));
        }

        let mut client_builder = ClientBuilder::new()
            .user_agent(self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;

        Ok(AuthApiClient {
            client,
            base_url,
            table_id: self.table_id,
            store: self
                .store
                .unwrap_or_else(|| SessionStore::in_memory(DEFAULT_STORAGE_KEY)),
            on_unauthorized: self.on_unauthorized,
        })
    }
}
