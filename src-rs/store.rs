//! Key-value persistence keyed by user id and item id.

use crate::error::StoreError;
use crate::util::write_json_pretty;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait KeyValueStore {
    fn put(&self, user_id: &str, item_id: &str, value: &Value) -> Result<(), StoreError>;
    fn get(&self, user_id: &str, item_id: &str) -> Result<Option<Value>, StoreError>;
    /// Item ids stored for a user, sorted.
    fn list(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
    fn delete(&self, user_id: &str, item_id: &str) -> Result<bool, StoreError>;
}

/// One JSON file per item under `<root>/<user_id>/<item_id>.json`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, user_id: &str, item_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(user_id)?;
        validate_key(item_id)?;
        Ok(self.root.join(user_id).join(format!("{item_id}.json")))
    }
}

impl KeyValueStore for LocalStore {
    fn put(&self, user_id: &str, item_id: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.item_path(user_id, item_id)?;
        write_json_pretty(&path, value)?;
        debug!(path = %path.display(), "stored item");
        Ok(())
    }

    fn get(&self, user_id: &str, item_id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.item_path(user_id, item_id)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        validate_key(user_id)?;
        let dir = self.root.join(user_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, user_id: &str, item_id: &str) -> Result<bool, StoreError> {
        let path = self.item_path(user_id, item_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keys become path components, so only `[A-Za-z0-9._-]` is allowed and a
/// leading dot is refused.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
