use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AuthApi};
use crate::models::{Credentials, Registration, TokenPair, UserProfile};

use super::error::AuthError;
use super::jwt;
use super::store::SharedTokenStore;

/// Default upper bound on a token refresh round trip
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// Default window before expiry in which a token is refreshed proactively
pub const DEFAULT_REFRESH_LEEWAY_SECS: u64 = 60;

/// Login state as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
    /// Logged in, with a token refresh in flight
    Refreshing,
}

impl SessionState {
    /// An access token is held in both `LoggedIn` and `Refreshing`
    pub fn is_logged_in(&self) -> bool {
        !matches!(self, SessionState::LoggedOut)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub refresh_timeout: Duration,
    pub refresh_leeway: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            refresh_leeway: Duration::from_secs(DEFAULT_REFRESH_LEEWAY_SECS),
        }
    }
}

/// The authenticated session: owns the current token pair, keeps it in
/// the token store, and refreshes it when it lapses.
///
/// Refreshes are single-flight. Callers that need a refresh while one is
/// running wait for it and share its outcome instead of issuing their own.
/// If a refresh fails the session logs out and every waiter gets
/// `AuthError::Authentication`.
pub struct AuthSession {
    api: Arc<dyn AuthApi>,
    store: SharedTokenStore,
    tokens: RwLock<Option<TokenPair>>,
    // Held while the token pair is being replaced (refresh, login, logout)
    refresh_gate: Mutex<()>,
    state: watch::Sender<SessionState>,
    options: SessionOptions,
}

impl AuthSession {
    pub fn new(api: Arc<dyn AuthApi>, store: SharedTokenStore) -> Self {
        Self::with_options(api, store, SessionOptions::default())
    }

    pub fn with_options(
        api: Arc<dyn AuthApi>,
        store: SharedTokenStore,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::LoggedOut);
        Self {
            api,
            store,
            tokens: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            state,
            options,
        }
    }

    // ===== State =====

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().is_logged_in()
    }

    /// Watch the login state. The receiver sees each transition once.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn publish(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(state = ?next, "Session state changed");
        }
    }

    /// The token pair currently held, if logged in
    pub async fn current_tokens(&self) -> Option<TokenPair> {
        self.tokens.read().await.clone()
    }

    // ===== Lifecycle =====

    /// Load a persisted session. Unreadable storage counts as no session.
    pub async fn restore(&self) -> SessionState {
        let _gate = self.refresh_gate.lock().await;

        let stored = match self.store.get().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Could not read stored tokens, starting logged out");
                None
            }
        };

        match stored {
            Some(tokens)
                if tokens.has_access_token()
                    && (tokens.usable_refresh_token().is_some()
                        || !jwt::is_expired(&tokens.access_token)) =>
            {
                debug!("Restored stored session");
                *self.tokens.write().await = Some(tokens);
                self.publish(SessionState::LoggedIn);
            }
            Some(_) => {
                // Expired with no way to refresh: nothing worth keeping
                if let Err(e) = self.store.clear().await {
                    warn!(error = %e, "Failed to clear stale stored tokens");
                }
                *self.tokens.write().await = None;
                self.publish(SessionState::LoggedOut);
            }
            None => {
                *self.tokens.write().await = None;
                self.publish(SessionState::LoggedOut);
            }
        }

        self.state()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Authentication(
                "Username and password required".to_string(),
            ));
        }

        let credentials = Credentials::new(username, password);
        let tokens = self.api.login(&credentials).await.map_err(|e| {
            warn!(username = %username, error = %e, "Login failed");
            AuthError::from_api(e)
        })?;

        self.establish(tokens).await?;
        info!(username = %username, "Login successful");
        Ok(())
    }

    pub async fn register(&self, registration: &Registration) -> Result<(), AuthError> {
        if registration.username.trim().is_empty()
            || registration.email.trim().is_empty()
            || registration.password.is_empty()
        {
            return Err(AuthError::Authentication(
                "Username, email and password required".to_string(),
            ));
        }

        let tokens = self.api.register(registration).await.map_err(|e| {
            warn!(username = %registration.username, error = %e, "Registration failed");
            AuthError::from_api(e)
        })?;

        self.establish(tokens).await?;
        info!(username = %registration.username, "Registration successful");
        Ok(())
    }

    /// Persist a freshly issued pair and mark the session logged in.
    /// Nothing changes if the pair cannot be saved.
    async fn establish(&self, tokens: TokenPair) -> Result<(), AuthError> {
        if !tokens.has_access_token() {
            return Err(AuthError::Authentication(
                "Server returned an empty access token".to_string(),
            ));
        }

        let _gate = self.refresh_gate.lock().await;
        self.store.save(&tokens).await.map_err(|e| {
            error!(error = %e, "Failed to save tokens");
            AuthError::from(e)
        })?;
        *self.tokens.write().await = Some(tokens);
        self.publish(SessionState::LoggedIn);
        Ok(())
    }

    /// End the session. The in-memory session is always dropped; a failure
    /// to clear the store is still returned.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;

        let cleared = self.store.clear().await;
        *self.tokens.write().await = None;
        self.publish(SessionState::LoggedOut);

        match cleared {
            Ok(()) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Logged out, but stored tokens could not be cleared");
                Err(e.into())
            }
        }
    }

    // ===== Tokens =====

    /// A usable access token, refreshed first if it is expired or about to be
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let current = self
            .current_tokens()
            .await
            .ok_or_else(AuthError::not_logged_in)?;

        if jwt::expires_within(&current.access_token, self.options.refresh_leeway) {
            debug!("Access token expired or expiring soon, refreshing");
            let fresh = self.refresh_from(&current.access_token).await?;
            return Ok(fresh.access_token);
        }

        Ok(current.access_token)
    }

    /// Exchange the refresh token for a new pair now
    pub async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let current = self
            .current_tokens()
            .await
            .ok_or_else(AuthError::not_logged_in)?;
        self.refresh_from(&current.access_token).await
    }

    /// Refresh the session if `stale_access` is still the current token.
    ///
    /// Whoever holds the gate while the stale token is still current does
    /// the network call; everyone queued behind it sees a different token
    /// (or none) and returns that.
    async fn refresh_from(&self, stale_access: &str) -> Result<TokenPair, AuthError> {
        let _gate = self.refresh_gate.lock().await;

        let Some(current) = self.current_tokens().await else {
            return Err(AuthError::Authentication(
                "Session ended, please log in again".to_string(),
            ));
        };
        if current.access_token != stale_access {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(current);
        }

        let Some(refresh_token) = current.usable_refresh_token().map(str::to_owned) else {
            self.force_logout("no refresh token available").await;
            return Err(AuthError::Authentication(
                "Session expired, please log in again".to_string(),
            ));
        };

        self.publish(SessionState::Refreshing);

        let outcome = tokio::time::timeout(
            self.options.refresh_timeout,
            self.api.refresh(&refresh_token),
        )
        .await;

        let mut fresh = match outcome {
            Ok(Ok(tokens)) if tokens.has_access_token() => tokens,
            Ok(Ok(_)) => {
                self.force_logout("refresh returned an empty access token").await;
                return Err(AuthError::Authentication(
                    "Session refresh failed: empty access token".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.force_logout(&e.to_string()).await;
                return Err(AuthError::Authentication(format!(
                    "Session refresh failed: {}",
                    e
                )));
            }
            Err(_) => {
                self.force_logout("refresh timed out").await;
                return Err(AuthError::Authentication(
                    "Session refresh timed out".to_string(),
                ));
            }
        };

        if fresh.usable_refresh_token().is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        // The server may have rotated the old refresh token, so the new pair
        // stays in memory even when it cannot be written.
        let saved = self.store.save(&fresh).await;
        *self.tokens.write().await = Some(fresh.clone());
        self.publish(SessionState::LoggedIn);

        if let Err(e) = saved {
            error!(error = %e, "Failed to persist refreshed tokens");
            return Err(AuthError::Storage(e));
        }
        info!("Access token refreshed");
        Ok(fresh)
    }

    /// Drop the session after a failed refresh. Caller holds the gate.
    async fn force_logout(&self, reason: &str) {
        warn!(reason = reason, "Token refresh failed, logging out");
        if let Err(e) = self.store.clear().await {
            error!(error = %e, "Failed to clear stored tokens");
        }
        *self.tokens.write().await = None;
        self.publish(SessionState::LoggedOut);
    }

    // ===== Authenticated requests =====

    /// Run an authenticated API call with the current access token.
    ///
    /// On a 401 the session refreshes (sharing any refresh already in
    /// flight) and retries once with the new token.
    pub async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, AuthError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self.access_token().await?;

        match call(token.clone()).await {
            Err(ApiError::Unauthorized) => {
                debug!("Request unauthorized, refreshing token and retrying");
                let fresh = self.refresh_from(&token).await?;
                match call(fresh.access_token).await {
                    Err(ApiError::Unauthorized) => Err(AuthError::Authentication(
                        "Request rejected after token refresh".to_string(),
                    )),
                    other => other.map_err(AuthError::from_request),
                }
            }
            other => other.map_err(AuthError::from_request),
        }
    }

    /// Fetch the logged-in user's profile
    pub async fn fetch_profile(&self) -> Result<UserProfile, AuthError> {
        self.authorized(move |token| async move { self.api.profile(&token).await })
            .await
    }
}
