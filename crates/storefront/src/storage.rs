//! Client-side key/value storage.
//!
//! Holds the small amount of state that must survive a restart: the open
//! order id and the credential pair. Each key is written atomically; no
//! lock is held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

/// Storage keys for persisted client state.
pub mod keys {
    /// Id of the open order.
    pub const ORDER_ID: &str = "order_id";

    /// Bearer access token.
    pub const ACCESS_TOKEN: &str = "access_token";

    /// Refresh token paired with the access token.
    pub const REFRESH_TOKEN: &str = "refresh_token";

    /// User id returned next to the token at login.
    pub const USER_ID: &str = "user_id";
}

/// Errors raised while writing client state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// String-valued key/value store.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Read a key.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the removal could not be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .remove(key);
        Ok(())
    }
}

/// Storage backed by a JSON object on disk.
///
/// The whole map is rewritten on every change: written to a sibling
/// temporary file, then renamed over the original.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the state file at `path`.
    ///
    /// An unreadable or corrupt file is treated as empty and overwritten on
    /// the next write.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read state file");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened state file");

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        apply(&mut entries);
        write_atomically(&self.path, &serde_json::to_vec_pretty(&*entries)?)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
