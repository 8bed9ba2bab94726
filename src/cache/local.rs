//! Fast local tier: a best-effort string key/value store.

use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    /// Atomically store `value` only if `key` is unset. Returns whether it was stored.
    fn insert_if_absent(&self, key: &str, value: &str) -> AppResult<bool>;
}

/// In-process store with an optional byte quota across all values.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .entries
            .lock()
            .map(|entries| entries.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("local store mutex poisoned".to_string()))
    }

    fn check_quota(&self, entries: &HashMap<String, String>, key: &str, value: &str) -> AppResult<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used: usize = entries
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, stored)| existing.len() + stored.len())
            .sum();
        let needed = used + key.len() + value.len();
        if needed > quota {
            return Err(AppError::Io(format!(
                "local store quota exceeded ({} of {} bytes)",
                needed, quota
            )));
        }
        Ok(())
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self.lock()?;
        self.check_quota(&entries, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn insert_if_absent(&self, key: &str, value: &str) -> AppResult<bool> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        self.check_quota(&entries, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    root: PathBuf,
}

impl FileLocalStore {
    pub fn new(root: &Path) -> AppResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_filename_component(key)))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn insert_if_absent(&self, key: &str, value: &str) -> AppResult<bool> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(key))
        {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(error) => return Err(error.into()),
        };
        file.write_all(value.as_bytes())?;
        Ok(true)
    }
}

/// Distinct keys always map to distinct file names: alphanumerics and `-`
/// pass through, every other byte (including `_`) becomes `_xx`.
fn encode_filename_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}
