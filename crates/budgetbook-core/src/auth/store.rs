use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::TokenPair;

use super::file_store::EncryptedFileTokenStore;
use super::keyring_store::KeyringTokenStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token encryption failed: {0}")]
    Crypto(String),

    #[error("Stored tokens are corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not resolve token storage location: {0}")]
    Location(String),

    #[error("No OS keychain is available on this platform")]
    NoKeychain,

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}

/// Durable storage for the session's token pair.
///
/// A failed `get` means "no tokens" to callers; a failed `save` or `clear`
/// is reported to whoever asked for it.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self) -> Result<Option<TokenPair>, StorageError>;

    /// Persist `tokens`. Returns once the write is durable.
    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError>;

    /// Remove any stored tokens. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

pub type SharedTokenStore = Arc<dyn TokenStore>;

/// Which backend holds the tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStorageKind {
    /// OS keychain / keystore
    Keyring,
    /// AES-GCM encrypted file in the config directory
    EncryptedFile,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl Default for TokenStorageKind {
    fn default() -> Self {
        if cfg!(target_os = "ios") {
            TokenStorageKind::Keyring
        } else {
            TokenStorageKind::EncryptedFile
        }
    }
}

impl TokenStorageKind {
    /// Build the store for this backend.
    ///
    /// `token_file` is only used by `EncryptedFile`; when `None` the
    /// platform default location is used.
    pub fn open(
        self,
        app_id: &str,
        token_file: Option<PathBuf>,
    ) -> Result<SharedTokenStore, StorageError> {
        let store: SharedTokenStore = match self {
            TokenStorageKind::Keyring => Arc::new(KeyringTokenStore::new(app_id)?),
            TokenStorageKind::EncryptedFile => {
                let path = match token_file {
                    Some(path) => path,
                    None => EncryptedFileTokenStore::default_path(app_id)?,
                };
                Arc::new(EncryptedFileTokenStore::for_current_user(path, app_id))
            }
            TokenStorageKind::Memory => Arc::new(InMemoryTokenStore::new()),
        };
        Ok(store)
    }
}

/// In-memory token store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StorageError> {
        Ok(self.tokens.read().await.clone())
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.tokens.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keyring_store::NATIVE_KEYCHAIN;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = InMemoryTokenStore::new();
        assert!(store.get().await.unwrap().is_none());

        let pair = TokenPair::new("access", Some("refresh".to_string()));
        store.save(&pair).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(pair));

        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[test]
    fn test_storage_kind_serde() {
        let kind: TokenStorageKind = serde_json::from_str(r#""encrypted_file""#).unwrap();
        assert_eq!(kind, TokenStorageKind::EncryptedFile);
        assert_eq!(
            serde_json::to_string(&TokenStorageKind::Keyring).unwrap(),
            r#""keyring""#
        );
    }

    #[tokio::test]
    async fn test_open_encrypted_file_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStorageKind::EncryptedFile
            .open("budgetbook-test", Some(dir.path().join("tokens.bin")))
            .unwrap();

        let pair = TokenPair::new("access", None);
        store.save(&pair).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(pair));
    }

    #[test]
    fn test_default_kind_is_persistent() {
        match TokenStorageKind::default() {
            TokenStorageKind::Keyring => assert!(NATIVE_KEYCHAIN),
            TokenStorageKind::EncryptedFile => {}
            TokenStorageKind::Memory => panic!("default must survive a restart"),
        }
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = TokenStorageKind::Memory.open("budgetbook-test", None).unwrap();
        assert!(store.get().await.unwrap().is_none());
    }
}
