//! Authentication API client methods

use super::{AuthApiClient, ClientError};
use altan_core::{Credentials, RegisterRequest, TokenResponse};
use reqwest::Method;
use serde_json::{Map, Value as JsonValue};

impl AuthApiClient {
    /// Exchange credentials for an access token (OAuth2 password form)
    pub async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ClientError> {
        let request = self.request(Method::POST, "/auth/login").form(&[
            ("username", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
        ]);
        self.execute(request).await
    }

    /// Invalidate the current token server side
    pub async fn logout(&self) -> Result<(), ClientError> {
        let request = self.request(Method::POST, "/auth/logout");
        self.execute_empty(request).await
    }

    /// Create a new user
    pub async fn register(&self, registration: &RegisterRequest) -> Result<JsonValue, ClientError> {
        let request = self
            .request(Method::POST, "/auth/register")
            .json(registration);
        self.execute(request).await
    }

    /// Raw profile payload of the token's user
    pub async fn me(&self) -> Result<JsonValue, ClientError> {
        let request = self.request(Method::GET, "/auth/me");
        self.execute(request).await
    }

    /// Apply a partial profile update and return the raw response payload
    pub async fn update_profile(
        &self,
        body: &Map<String, JsonValue>,
    ) -> Result<JsonValue, ClientError> {
        let request = self.request(Method::PATCH, "/auth/update").json(body);
        self.execute(request).await
    }

    /// Re-issue the access token using the current one
    pub async fn refresh(&self) -> Result<TokenResponse, ClientError> {
        let request = self.request(Method::POST, "/auth/refresh");
        self.execute(request).await
    }
}
