//! Local key-value store backed by a single JSON file
//!
//! The node keeps its `userId` here. Reads never fail: a missing or
//! corrupt file reads as an empty mapping.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Key holding the user identifier
pub const USER_ID_KEY: &str = "userId";

/// Flat JSON mapping persisted on disk
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole mapping.
    ///
    /// Absent files and anything that is not a JSON object yield an empty map.
    pub fn get(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Store not readable, treating as empty");
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(path = %self.path.display(), "Store is not a JSON object, treating as empty");
                Map::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Store is not valid JSON, treating as empty");
                Map::new()
            }
        }
    }

    /// Merge `partial` over the stored mapping and write the result back.
    ///
    /// Matching keys are replaced; other keys are kept.
    pub fn set(&self, partial: Map<String, Value>) -> Result<()> {
        let mut merged = self.get();
        merged.extend(partial);

        let json = serde_json::to_string(&Value::Object(merged))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        fs::write(&self.path, json).map_err(|e| Error::IoWrite {
            path: self.path.clone(),
            source: e,
        })?;

        debug!(path = %self.path.display(), "Store updated");
        Ok(())
    }

    /// The stored user identifier.
    ///
    /// Non-empty strings are used as is and non-zero numbers in their JSON
    /// form. Anything else counts as missing.
    pub fn user_id(&self) -> Option<String> {
        match self.get().remove(USER_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Load the user identifier or fail with [`Error::MissingUserId`]
    pub fn require_user_id(&self) -> Result<String> {
        self.user_id().ok_or_else(|| Error::MissingUserId {
            path: self.path.clone(),
        })
    }

    /// Persist `id` as the user identifier
    pub fn set_user_id(&self, id: &str) -> Result<()> {
        let mut partial = Map::new();
        partial.insert(USER_ID_KEY.to_string(), Value::String(id.to_string()));
        self.set(partial)
    }
}
