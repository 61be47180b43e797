use std::fmt;

use serde::{Deserialize, Serialize};

/// An access/refresh token pair issued by the auth endpoints.
///
/// This is also the stored representation: stores serialize it as
/// `{"accessToken": "...", "refreshToken": "..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// A pair only counts as a session when it carries an access token
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// The refresh token, if present and non-empty
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

// Token values must never end up in logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(redact),
            )
            .finish()
    }
}

fn redact(token: &str) -> String {
    format!("<redacted, {} bytes>", token.len())
}
