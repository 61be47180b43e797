//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `AuthSession`: login, registration, logout and single-flight token refresh
//! - `TokenStore`: durable token storage, with keychain, encrypted file and
//!   in-memory backends
//! - `jwt`: expiry checks on bearer tokens (no signature verification)

pub mod error;
pub mod file_store;
pub mod jwt;
pub mod keyring_store;
pub mod session;
pub mod store;

pub use error::AuthError;
pub use file_store::EncryptedFileTokenStore;
pub use keyring_store::KeyringTokenStore;
pub use session::{AuthSession, SessionOptions, SessionState};
pub use store::{InMemoryTokenStore, SharedTokenStore, StorageError, TokenStorageKind, TokenStore};
