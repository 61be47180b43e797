//! API client for the budgetbook REST API.
//!
//! This module provides the `ApiClient` struct for the authentication
//! endpoints and the authenticated profile fetch, and the `AuthApi` trait
//! that `AuthSession` is written against.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{Credentials, RefreshRequest, Registration, TokenPair, UserProfile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the budgetbook API
pub const DEFAULT_API_BASE_URL: &str = "https://api.budgetbook.app/v1";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// The HTTP operations the auth session depends on.
///
/// `ApiClient` is the production implementation; tests substitute a
/// scripted fake.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token pair
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError>;

    /// Create an account and return its first token pair
    async fn register(&self, registration: &Registration) -> Result<TokenPair, ApiError>;

    /// Exchange a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    /// Fetch the profile of the user owning `access_token`
    async fn profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;
}

/// API client for budgetbook.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client against `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::BadRequest("API base URL is empty".to_string()));
        }

        Ok(Self {
            client,
            base_url,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request built by `build`, retrying with exponential backoff on 429,
    /// and decode the JSON body.
    async fn send<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = build()
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| {
                        ApiError::InvalidResponse(format!(
                            "Failed to parse response from {}: {}",
                            url, e
                        ))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn post_for_tokens<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenPair, ApiError> {
        let url = self.endpoint(path);
        let tokens: TokenPair = self.send(&url, || self.client.post(&url).json(body)).await?;
        if !tokens.has_access_token() {
            return Err(ApiError::InvalidResponse(format!(
                "Response from {} did not include an access token",
                url
            )));
        }
        Ok(tokens)
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        debug!(username = %credentials.username, "Sending login request");
        self.post_for_tokens("auth/login", credentials).await
    }

    async fn register(&self, registration: &Registration) -> Result<TokenPair, ApiError> {
        debug!(username = %registration.username, "Sending registration request");
        self.post_for_tokens("auth/register", registration).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        debug!("Sending token refresh request");
        self.post_for_tokens("auth/refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let url = self.endpoint("users/me");
        self.send(&url, || self.client.get(&url).bearer_auth(access_token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let client = ApiClient::new("https://example.test/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://example.test/v1");
        assert_eq!(client.endpoint("auth/login"), "https://example.test/v1/auth/login");
        assert_eq!(client.endpoint("/users/me"), "https://example.test/v1/users/me");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        assert!(ApiClient::new("", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_login_returns_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"username": "alice", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "a.b.c",
                "refreshToken": "r1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "a.b.c");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_login_rejected_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .login(&Credentials::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_missing_access_token_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": ""})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .register(&Registration::new("bob", "bob@example.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new"})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server).refresh("r1").await.unwrap();
        assert_eq!(tokens.access_token, "new");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_profile_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u-1",
                "username": "alice"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let profile = client_for(&server).profile("tok").await.unwrap();
        assert_eq!(profile.username, "alice");
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(429))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let err = client_for(&server).profile("tok").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).profile("tok").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
