//! Budgetbook core - authentication and token management for the
//! budgetbook client.
//!
//! The UI layer talks to an [`AuthSession`]: it logs in or registers,
//! watches the [`SessionState`] signal to pick a screen, and runs API
//! calls through [`AuthSession::authorized`] so expired tokens are
//! refreshed transparently.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, AuthApi};
pub use auth::{AuthError, AuthSession, SessionState, TokenStorageKind, TokenStore};
pub use config::Config;
pub use models::{Registration, TokenPair, UserProfile};
