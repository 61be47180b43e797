//! Encrypted on-disk token store for desktop platforms.
//!
//! The key is derived from the OS username with PBKDF2-HMAC-SHA256, so
//! the file is unreadable when copied to another account or machine user.
//! There is no user passphrase: this keeps tokens out of plain sight on
//! disk, it does not protect against code running as the same user.
//!
//! File layout: `IV (12 bytes) || AES-256-GCM ciphertext || tag (16 bytes)`,
//! plaintext is the `TokenPair` JSON.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::models::TokenPair;

use super::store::{StorageError, TokenStore};

/// Token file name inside the app's config directory
const TOKEN_FILE: &str = "tokens.bin";

/// PBKDF2 iteration count for the file key
const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES-GCM nonce size (96 bits)
const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size (128 bits)
const TAG_SIZE: usize = 16;

/// Username used when the OS does not report one
const FALLBACK_USERNAME: &str = "budgetbook";

pub struct EncryptedFileTokenStore {
    path: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileTokenStore {
    /// Create a store at `path` keyed by `username` and `app_id`
    pub fn new(path: PathBuf, username: &str, app_id: &str) -> Self {
        Self::with_iterations(path, username, app_id, PBKDF2_ITERATIONS)
    }

    /// Create a store keyed by the current OS user
    pub fn for_current_user(path: PathBuf, app_id: &str) -> Self {
        Self::new(path, &os_username(), app_id)
    }

    fn with_iterations(path: PathBuf, username: &str, app_id: &str, iterations: u32) -> Self {
        Self {
            path,
            key: derive_key(username, app_id, iterations),
        }
    }

    /// `<config dir>/<app_id>/tokens.bin`
    pub fn default_path(app_id: &str) -> Result<PathBuf, StorageError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| StorageError::Location("Could not find config directory".to_string()))?;
        Ok(config_dir.join(app_id).join(TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm, StorageError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StorageError::Crypto(format!("cipher init failed: {e}")))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| StorageError::Crypto(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(IV_SIZE + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        if blob.len() < IV_SIZE + TAG_SIZE {
            return Err(StorageError::Crypto(format!(
                "token file too short ({} bytes)",
                blob.len()
            )));
        }

        let (iv, ciphertext) = blob.split_at(IV_SIZE);
        self.cipher()?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|e| StorageError::Crypto(format!("decryption failed: {e}")))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| TOKEN_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// The OS account name, from `USER` or `USERNAME`
fn os_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_USERNAME.to_string())
}

/// PBKDF2-HMAC-SHA256 with the username as password and username + app id as salt
fn derive_key(username: &str, app_id: &str, iterations: u32) -> [u8; 32] {
    let salt = format!("{username}{app_id}");
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(username.as_bytes(), salt.as_bytes(), iterations, &mut key);
    key
}

#[async_trait]
impl TokenStore for EncryptedFileTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StorageError> {
        let blob = match tokio::fs::read(&self.path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plaintext = self.decrypt(&blob)?;
        let tokens: TokenPair = serde_json::from_slice(&plaintext)?;
        Ok(Some(tokens))
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let plaintext = serde_json::to_vec(tokens)?;
        let blob = self.encrypt(&plaintext)?;

        // Write a sibling file and rename it into place so a crash never
        // leaves a half-written token file behind.
        let temp = self.temp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await?;
        file.write_all(&blob).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), "Tokens saved to encrypted file");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Token file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
