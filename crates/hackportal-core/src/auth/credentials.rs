use std::fmt;

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::fingerprint;

/// Storage key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Storage key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Keychain service name used when none is configured
pub const DEFAULT_SERVICE_NAME: &str = "hackportal";

/// Access token plus refresh token issued by the identity provider.
///
/// Serializes with the same field names the auth endpoints use
/// (`token`, `refreshToken`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct CredentialPair {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never show up in Debug output
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &fingerprint(&self.access_token))
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize credentials: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for the credential pair.
///
/// Both keys are written together and cleared together; an implementation
/// must never leave only one of them behind.
pub trait CredentialStorage: Send + Sync {
    /// Load the persisted pair, if a complete one exists
    fn load(&self) -> Result<Option<CredentialPair>, StorageError>;

    /// Persist the pair, replacing any previous one
    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError>;

    /// Remove both keys
    fn clear(&self) -> Result<(), StorageError>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// Per-key secret access underneath a pair-oriented store
trait SecretSlots {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn load_pair(slots: &impl SecretSlots) -> Result<Option<CredentialPair>, StorageError> {
    match (slots.read(ACCESS_TOKEN_KEY)?, slots.read(REFRESH_TOKEN_KEY)?) {
        (Some(access), Some(refresh)) => Ok(Some(CredentialPair::new(access, refresh))),
        (None, None) => Ok(None),
        _ => {
            warn!("Found a partial credential pair, discarding it");
            clear_pair(slots)?;
            Ok(None)
        }
    }
}

/// Write both keys. If the second write fails the previous pair (or
/// nothing) is put back, and both keys are cleared if even that fails.
fn save_pair(slots: &impl SecretSlots, pair: &CredentialPair) -> Result<(), StorageError> {
    let previous = load_pair(slots)?;
    slots.write(ACCESS_TOKEN_KEY, &pair.access_token)?;

    if let Err(e) = slots.write(REFRESH_TOKEN_KEY, &pair.refresh_token) {
        let restored = match &previous {
            Some(previous) => slots.write(ACCESS_TOKEN_KEY, &previous.access_token),
            None => slots.remove(ACCESS_TOKEN_KEY),
        };
        if let Err(rollback) = restored {
            warn!(error = %rollback, "Failed to roll back partial write, clearing credential pair");
            if let Err(cleared) = clear_pair(slots) {
                warn!(error = %cleared, "Failed to clear credential pair");
            }
        }
        return Err(e);
    }
    Ok(())
}

fn clear_pair(slots: &impl SecretSlots) -> Result<(), StorageError> {
    // Attempt both deletes even if the first fails
    let access = slots.remove(ACCESS_TOKEN_KEY);
    let refresh = slots.remove(REFRESH_TOKEN_KEY);
    access.and(refresh)
}

/// Credential storage in the OS keychain.
///
/// Each key is a separate keychain entry under the same service name.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE_NAME)
    }

    /// Use a custom service name, e.g. to keep environments apart
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSlots for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Ok(self.entry(key)?.set_password(value)?)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStorage for KeyringStorage {
    fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        load_pair(self)
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        save_pair(self, pair)?;
        debug!(service = %self.service, "Stored credential pair in keychain");
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        clear_pair(self)
    }

    fn backend(&self) -> &'static str {
        "keyring"
    }
}
