use std::sync::Arc;

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use crate::models::TokenPair;

use super::store::{StorageError, TokenStore};

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Whether this build links a native keychain backend. Elsewhere keyring
/// would fall back to a per-process mock that loses tokens on exit.
pub const NATIVE_KEYCHAIN: bool = cfg!(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "windows",
    target_os = "linux"
));

struct Entries {
    access: Entry,
    refresh: Entry,
}

/// Token store backed by the OS credential store (Keychain, Credential
/// Manager, kernel keyutils).
///
/// Each token is its own entry under the app's service name. Keychain
/// calls block, so they run on the blocking thread pool.
pub struct KeyringTokenStore {
    entries: Arc<Entries>,
}

impl KeyringTokenStore {
    pub fn new(service: &str) -> Result<Self, StorageError> {
        if !NATIVE_KEYCHAIN {
            return Err(StorageError::NoKeychain);
        }
        let entries = Entries {
            access: Entry::new(service, ACCESS_TOKEN_KEY)?,
            refresh: Entry::new(service, REFRESH_TOKEN_KEY)?,
        };
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// Build the entries from an explicit credential builder instead of
    /// the platform default
    #[cfg(test)]
    fn with_credential_builder(
        service: &str,
        builder: &keyring::credential::CredentialBuilder,
    ) -> Result<Self, StorageError> {
        let entries = Entries {
            access: Entry::new_with_credential(builder.build(None, service, ACCESS_TOKEN_KEY)?),
            refresh: Entry::new_with_credential(builder.build(None, service, REFRESH_TOKEN_KEY)?),
        };
        Ok(Self {
            entries: Arc::new(entries),
        })
    }
}

/// Read an entry, mapping "no such entry" to `None`
fn read_entry(entry: &Entry) -> Result<Option<String>, StorageError> {
    match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete an entry, treating an already-missing entry as success
fn delete_entry(entry: &Entry) -> Result<(), StorageError> {
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StorageError> {
        let entries = Arc::clone(&self.entries);
        tokio::task::spawn_blocking(move || -> Result<Option<TokenPair>, StorageError> {
            let Some(access_token) = read_entry(&entries.access)? else {
                return Ok(None);
            };
            let refresh_token = read_entry(&entries.refresh)?;
            Ok(Some(TokenPair {
                access_token,
                refresh_token,
            }))
        })
        .await?
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        let entries = Arc::clone(&self.entries);
        let tokens = tokens.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            entries.access.set_password(&tokens.access_token)?;
            match tokens.refresh_token.as_deref() {
                Some(refresh) => entries.refresh.set_password(refresh)?,
                None => delete_entry(&entries.refresh)?,
            }
            debug!("Tokens saved to keychain");
            Ok(())
        })
        .await?
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let entries = Arc::clone(&self.entries);
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            delete_entry(&entries.access)?;
            delete_entry(&entries.refresh)?;
            debug!("Tokens removed from keychain");
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The mock backend keeps state per `Entry`, which is why the store
    // holds on to its entries instead of recreating them per call.
    fn mock_store() -> KeyringTokenStore {
        let builder = keyring::mock::default_credential_builder();
        KeyringTokenStore::with_credential_builder("budgetbook-test", builder.as_ref()).unwrap()
    }

    #[tokio::test]
    async fn test_keyring_round_trip() {
        let store = mock_store();
        assert!(store.get().await.unwrap().is_none());

        let pair = TokenPair::new("access", Some("refresh".to_string()));
        store.save(&pair).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(pair));
    }

    #[tokio::test]
    async fn test_keyring_save_without_refresh_token() {
        let store = mock_store();
        store
            .save(&TokenPair::new("first", Some("r".to_string())))
            .await
            .unwrap();
        store.save(&TokenPair::new("second", None)).await.unwrap();

        let loaded = store.get().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "second");
        assert!(loaded.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_keyring_clear() {
        let store = mock_store();
        store.clear().await.unwrap();

        store
            .save(&TokenPair::new("access", Some("refresh".to_string())))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyring_tokens_visible_to_new_store() {
        if !NATIVE_KEYCHAIN {
            return;
        }
        let service = format!("budgetbook-test-{}", std::process::id());
        let writer = KeyringTokenStore::new(&service).unwrap();
        let pair = TokenPair::new("access", Some("refresh".to_string()));

        if let Err(e) = writer.save(&pair).await {
            // Sandboxed runners may deny keychain access entirely
            eprintln!("skipping, keychain unavailable: {}", e);
            return;
        }

        let reader = KeyringTokenStore::new(&service).unwrap();
        let loaded = reader.get().await;
        writer.clear().await.unwrap();
        assert_eq!(loaded.unwrap(), Some(pair));
    }
}
