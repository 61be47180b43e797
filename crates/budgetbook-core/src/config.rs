//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API endpoint, which token backend to use, timeouts, and the last
//! used username.
//!
//! Configuration is stored at `<config dir>/budgetbook/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::api::ApiClient;
use crate::auth::session::{DEFAULT_REFRESH_LEEWAY_SECS, DEFAULT_REFRESH_TIMEOUT_SECS};
use crate::auth::{AuthSession, SessionOptions, SharedTokenStore, TokenStorageKind};

/// Application name used for config/cache directory paths and as the
/// keychain service / key-derivation app id
pub const APP_NAME: &str = "budgetbook";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "BUDGETBOOK_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_username: Option<String>,
    pub token_storage: Option<TokenStorageKind>,
    /// Overrides the platform default token file location
    pub token_file: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub refresh_timeout_secs: Option<u64>,
    pub refresh_leeway_secs: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `BUDGETBOOK_API_URL` if set
    pub fn with_env_overrides(self) -> Self {
        self.with_api_url_override(std::env::var(API_URL_ENV).ok())
    }

    fn with_api_url_override(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = Some(url.trim().to_string());
        }
        self
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn token_storage(&self) -> TokenStorageKind {
        self.token_storage.unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            refresh_timeout: Duration::from_secs(
                self.refresh_timeout_secs.unwrap_or(DEFAULT_REFRESH_TIMEOUT_SECS),
            ),
            refresh_leeway: Duration::from_secs(
                self.refresh_leeway_secs.unwrap_or(DEFAULT_REFRESH_LEEWAY_SECS),
            ),
        }
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::new(self.api_base_url(), self.request_timeout())
            .context("Failed to create API client")
    }

    pub fn token_store(&self) -> Result<SharedTokenStore> {
        self.token_storage()
            .open(APP_NAME, self.token_file.clone())
            .context("Failed to open token storage")
    }

    /// Build a session wired to the configured API and token store.
    /// Call `restore()` on it to pick up a persisted login.
    pub fn open_session(&self) -> Result<AuthSession> {
        let api = Arc::new(self.api_client()?);
        let store = self.token_store()?;
        Ok(AuthSession::with_options(api, store, self.session_options()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let options = config.session_options();
        assert_eq!(options.refresh_timeout, Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS));
        assert_eq!(options.refresh_leeway, Duration::from_secs(DEFAULT_REFRESH_LEEWAY_SECS));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_base_url: Some("http://localhost:8080/v1".to_string()),
            last_username: Some("alice".to_string()),
            token_storage: Some(TokenStorageKind::Memory),
            refresh_leeway_secs: Some(5),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.token_storage(), TokenStorageKind::Memory);
        assert_eq!(loaded.session_options().refresh_leeway, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"token_storage":"keyring"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.token_storage(), TokenStorageKind::Keyring);
        assert!(config.last_username.is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_api_url_override() {
        let config =
            Config::default().with_api_url_override(Some(" http://127.0.0.1:9000 ".into()));
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9000");

        let config = Config::default().with_api_url_override(Some("".into()));
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_dirs_are_app_scoped() {
        if let Ok(dir) = Config::default().cache_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
        if let Ok(dir) = Config::config_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }

    #[tokio::test]
    async fn test_open_session_with_memory_store() {
        let config = Config {
            api_base_url: Some("http://127.0.0.1:1".to_string()),
            token_storage: Some(TokenStorageKind::Memory),
            ..Config::default()
        };
        let session = config.open_session().unwrap();
        assert_eq!(session.restore().await, crate::auth::SessionState::LoggedOut);
    }
}
