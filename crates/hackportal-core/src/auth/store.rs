//! File-backed and in-memory credential storage.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{
    CredentialPair, CredentialStorage, StorageError, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};

/// Credentials file name in the cache directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedPair {
    token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
}

/// Credential storage in a JSON file.
///
/// Writes go to a temporary file that is renamed over the real one, so a
/// crash mid-write never leaves half a pair on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store credentials as `credentials.json` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Open for writing, owner-only from creation on unix
    fn open_private(path: &Path) -> std::io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;
        // A leftover temp file keeps its old mode, so tighten it as well
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(file)
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let persisted: PersistedPair = serde_json::from_str(&contents)?;
        debug!(saved_at = %persisted.saved_at, "Loaded credential pair from file");
        Ok(Some(CredentialPair::new(persisted.token, persisted.refresh_token)))
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = PersistedPair {
            token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&persisted)?;

        let temp = self.temp_path();
        let mut file = Self::open_private(&temp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// In-process credential storage.
///
/// Keeps the same two-key layout as the durable backends. Writes can be made
/// to fail, which is how tests exercise storage errors.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<&'static str, String>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pair already persisted
    pub fn with_pair(pair: &CredentialPair) -> Self {
        let storage = Self::new();
        storage.put(pair);
        storage
    }

    /// Raw key/value view of what is persisted
    pub fn entries(&self) -> HashMap<String, String> {
        self.lock()
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    /// Number of successful saves and clears so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent saves and clears fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, pair: &CredentialPair) {
        let mut entries = self.lock();
        entries.insert(ACCESS_TOKEN_KEY, pair.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY, pair.refresh_token.clone());
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage is read-only".to_string()));
        }
        Ok(())
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self) -> Result<Option<CredentialPair>, StorageError> {
        let entries = self.lock();
        match (entries.get(ACCESS_TOKEN_KEY), entries.get(REFRESH_TOKEN_KEY)) {
            (Some(access), Some(refresh)) => {
                Ok(Some(CredentialPair::new(access.clone(), refresh.clone())))
            }
            _ => Ok(None),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        self.check_writable()?;
        self.put(pair);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock().clear();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
