//! Portal configuration management.
//!
//! Settings are resolved from built-in defaults, then the config file at
//! `~/.config/hackportal/config.json`, then `HACKPORTAL_*` environment
//! variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "hackportal";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_URL: &str = "https://api.hackthe6ix.com";

pub const DEFAULT_AUTH_PROVIDER: &str = "ht6";

pub const ENV_API_URL: &str = "HACKPORTAL_API_URL";
pub const ENV_AUTH_PROVIDER: &str = "HACKPORTAL_AUTH_PROVIDER";
pub const ENV_STORAGE: &str = "HACKPORTAL_STORAGE";
pub const ENV_REQUEST_TIMEOUT: &str = "HACKPORTAL_REQUEST_TIMEOUT_SECS";

/// Where the credential pair is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalConfig {
    /// Base URL of the portal API, without a trailing slash
    pub api_url: String,
    /// Identity provider segment of the credential endpoints
    pub auth_provider: String,
    /// Transport timeout; no timeout when unset
    pub request_timeout_secs: Option<u64>,
    pub storage: StorageBackend,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_provider: DEFAULT_AUTH_PROVIDER.to_string(),
            request_timeout_secs: None,
            storage: StorageBackend::default(),
        }
    }
}

impl PortalConfig {
    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by variable name.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(provider) = lookup(ENV_AUTH_PROVIDER) {
            self.auth_provider = provider;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse::<StorageBackend>()?;
        }
        if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT) {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of seconds", ENV_REQUEST_TIMEOUT))?;
            self.request_timeout_secs = Some(secs);
        }
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// `POST` target for exchanging a refresh token
    pub fn refresh_path(&self) -> String {
        format!("/auth/{}/refresh", self.auth_provider)
    }

    /// `POST` target for ending the session server-side
    pub fn logout_path(&self) -> String {
        format!("/auth/{}/logout", self.auth_provider)
    }

    /// Open the configured credential storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn CredentialStorage>> {
        let storage: Arc<dyn CredentialStorage> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::File => Arc::new(FileStorage::in_dir(&Self::cache_dir()?)),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(storage)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PortalConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_credential_paths_use_provider() {
        let config = PortalConfig::default()
            .with_overrides(lookup(&[(ENV_AUTH_PROVIDER, "github")]))
            .unwrap();
        assert_eq!(config.refresh_path(), "/auth/github/refresh");
        assert_eq!(config.logout_path(), "/auth/github/logout");
    }

    #[test]
    fn test_overrides_apply_and_trim_trailing_slash() {
        let config = PortalConfig::default()
            .with_overrides(lookup(&[
                (ENV_API_URL, "http://localhost:6971/"),
                (ENV_STORAGE, "File"),
                (ENV_REQUEST_TIMEOUT, "15"),
            ]))
            .unwrap();
        assert_eq!(config.api_url, "http://localhost:6971");
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_bad_overrides_are_errors() {
        assert!(PortalConfig::default()
            .with_overrides(lookup(&[(ENV_STORAGE, "floppy")]))
            .is_err());
        assert!(PortalConfig::default()
            .with_overrides(lookup(&[(ENV_REQUEST_TIMEOUT, "soon")]))
            .is_err());
    }

    #[test]
    fn test_partial_config_file_falls_back_to_defaults() {
        let config: PortalConfig = serde_json::from_str(r#"{"authProvider":"google"}"#).unwrap();
        assert_eq!(config.auth_provider, "google");
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }
}
