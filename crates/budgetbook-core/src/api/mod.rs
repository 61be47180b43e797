//! REST API client module for the budgetbook service.
//!
//! This module provides the `ApiClient` for the authentication endpoints
//! (login, registration, token refresh) and the authenticated profile
//! fetch, plus the `AuthApi` trait the session talks to.
//!
//! The API uses JWT bearer token authentication; a 401 on an
//! authenticated call is the signal to refresh.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthApi};
pub use error::ApiError;
