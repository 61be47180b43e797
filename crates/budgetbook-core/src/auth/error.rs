use thiserror::Error;

use crate::api::ApiError;

use super::store::StorageError;

/// Errors surfaced by `AuthSession` operations.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Credentials, registration, or refresh rejected; or no session at all
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport failure; never retried automatically
    #[error("Network error: {0}")]
    Network(String),

    /// Token persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Any other API failure
    #[error(transparent)]
    Api(ApiError),
}

impl AuthError {
    pub(crate) fn not_logged_in() -> Self {
        AuthError::Authentication("Not logged in".to_string())
    }

    /// Classify a failed login, registration, or refresh call
    pub fn from_api(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => {
                AuthError::Authentication("Invalid username or password".to_string())
            }
            ApiError::AccessDenied(msg) | ApiError::BadRequest(msg) => {
                AuthError::Authentication(msg)
            }
            ApiError::NetworkError(msg) => AuthError::Network(msg),
            ApiError::Timeout => AuthError::Network("Request timed out".to_string()),
            other => AuthError::Api(other),
        }
    }

    /// Classify a failed authenticated data request
    pub fn from_request(e: ApiError) -> Self {
        match e {
            ApiError::NetworkError(msg) => AuthError::Network(msg),
            ApiError::Timeout => AuthError::Network("Request timed out".to_string()),
            other => AuthError::Api(other),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, AuthError::Authentication(_))
    }

    /// A message suitable for showing on the login screen
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Authentication(msg) if msg.trim().is_empty() => {
                "Invalid username or password".to_string()
            }
            AuthError::Authentication(msg) => msg.clone(),
            AuthError::Network(msg) if msg.to_lowercase().contains("timed out") => {
                "Connection timed out. Please try again.".to_string()
            }
            AuthError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Storage(_) => {
                "Signed in, but the session could not be saved on this device.".to_string()
            }
            AuthError::Api(ApiError::RateLimited) => {
                "Too many attempts. Please wait a moment and try again.".to_string()
            }
            AuthError::Api(e) => format!("Login failed: {}", e),
        }
    }
}
