//! Durable storage
//!
//! Everything trackwire persists is a JSON value under a fixed key: the
//! failed-batch log, the user id and the detected device info. Any backend
//! implementing [`KeyValueStore`] can hold them; [`SqliteStore`] is the one
//! that survives process restarts.

mod failed;
mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

pub use failed::{FailedBatchStore, FAILED_DATA_KEY};
pub use sqlite::SqliteStore;

/// Minimal persistent key-value contract
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replace the value under `key`
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Delete `key`; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store for hosts without a writable disk, and for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
