//! Credential persistence
//!
//! Two scopes, mirroring how the browser client split its storage:
//! - Ephemeral: the access token, gone when the process/session ends
//! - Durable: the refresh token and the last-known organization
//!
//! Every operation is synchronous and visible to the next read immediately.
//! Nothing here coordinates between processes sharing one durable file.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const ORGANIZATION_KEY: &str = "organization";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access credential file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A string key/value scope
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process scope
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// JSON file scope that survives restarts.
///
/// Reads are served from memory; every mutation rewrites the file with
/// owner-only permissions. A failed write is logged and the in-memory view
/// stays authoritative for this process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Err(e) = write_private(&self.path, entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist credentials");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}

fn write_private(path: &Path, entries: &HashMap<String, String>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(entries)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(content.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(content.as_bytes())?;
    }

    Ok(())
}

/// Point-in-time view of everything the store holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub organization: Option<Value>,
}

/// Access/refresh token and cached organization storage.
///
/// Cheap to clone; clones share the same scopes.
///
/// Pair writes and `clear_all` are serialized so the conditional variants can
/// compare the refresh token and write without another writer slipping in.
#[derive(Clone)]
pub struct TokenStore {
    ephemeral: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    writes: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(ephemeral: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            ephemeral,
            durable,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Both scopes in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Ephemeral scope in memory, durable scope in a JSON file
    pub fn with_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FileStore::open(path)?),
        ))
    }

    pub fn access_token(&self) -> Option<String> {
        self.ephemeral.get(ACCESS_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str) {
        self.ephemeral.set(ACCESS_TOKEN_KEY, token);
    }

    pub fn clear_access_token(&self) {
        self.ephemeral.remove(ACCESS_TOKEN_KEY);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.durable.get(REFRESH_TOKEN_KEY)
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.durable.set(REFRESH_TOKEN_KEY, token);
    }

    pub fn clear_refresh_token(&self) {
        self.durable.remove(REFRESH_TOKEN_KEY);
    }

    /// Cached organization. An unparsable entry reads as absent.
    pub fn organization(&self) -> Option<Value> {
        let raw = self.durable.get(ORGANIZATION_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable cached organization");
                None
            }
        }
    }

    pub fn set_organization(&self, organization: &Value) {
        self.durable.set(ORGANIZATION_KEY, &organization.to_string());
    }

    pub fn clear_organization(&self) {
        self.durable.remove(ORGANIZATION_KEY);
    }

    /// Store a freshly issued pair
    pub fn set_pair(&self, access_token: &str, refresh_token: &str) {
        let _guard = self.writes.lock();
        self.write_pair(access_token, refresh_token);
    }

    pub fn clear_all(&self) {
        let _guard = self.writes.lock();
        self.remove_all();
    }

    /// Store a rotated pair, but only while `presented` is still the stored
    /// refresh token. Returns false and writes nothing otherwise.
    pub fn rotate_pair(&self, presented: &str, access_token: &str, refresh_token: &str) -> bool {
        let _guard = self.writes.lock();
        if self.refresh_token().as_deref() != Some(presented) {
            return false;
        }
        self.write_pair(access_token, refresh_token);
        true
    }

    /// `clear_all`, but only while `presented` is still the stored refresh token
    pub fn clear_if_current(&self, presented: &str) -> bool {
        let _guard = self.writes.lock();
        if self.refresh_token().as_deref() != Some(presented) {
            return false;
        }
        self.remove_all();
        true
    }

    fn write_pair(&self, access_token: &str, refresh_token: &str) {
        self.set_access_token(access_token);
        self.set_refresh_token(refresh_token);
    }

    fn remove_all(&self) {
        self.clear_access_token();
        self.clear_refresh_token();
        self.clear_organization();
    }

    pub fn snapshot(&self) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token(),
            refresh_token: self.refresh_token(),
            organization: self.organization(),
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print token values
        f.debug_struct("TokenStore")
            .field("has_access_token", &self.access_token().is_some())
            .field("has_refresh_token", &self.refresh_token().is_some())
            .finish()
    }
}
