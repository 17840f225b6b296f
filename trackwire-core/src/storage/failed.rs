//! Failed-batch store
//!
//! Envelopes whose batch exhausted its delivery attempts are appended to a
//! single JSON array kept under [`FAILED_DATA_KEY`]. The serialized array
//! never exceeds the configured cap: when an append would overflow it, the
//! oldest quarter of entries is dropped, repeatedly, until it fits.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use super::KeyValueStore;
use crate::error::Result;
use crate::types::Envelope;

/// Storage slot holding the failed envelopes
pub const FAILED_DATA_KEY: &str = "tracker_failed_data";

/// Bounded append log of undeliverable envelopes
pub struct FailedBatchStore {
    kv: Arc<dyn KeyValueStore>,
    max_bytes: usize,
    // Serializes read-modify-write cycles on the slot.
    write_lock: Mutex<()>,
}

impl FailedBatchStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, max_bytes: usize) -> Self {
        Self {
            kv,
            max_bytes,
            write_lock: Mutex::new(()),
        }
    }

    /// Every stored envelope, oldest first
    pub fn load(&self) -> Result<Vec<Envelope>> {
        match self.kv.get(FAILED_DATA_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Append `batch`, evicting the oldest entries past the size cap
    ///
    /// Returns the number of envelopes evicted to make room.
    pub fn append(&self, batch: &[Envelope]) -> Result<usize> {
        let _guard = self.lock();

        let mut entries = self.load()?;
        entries.extend_from_slice(batch);

        let mut evicted = 0;
        let mut size = serde_json::to_vec(&entries)?.len();
        while size > self.max_bytes && !entries.is_empty() {
            let drop_count = (entries.len() / 4).max(1);
            entries.drain(..drop_count);
            evicted += drop_count;
            size = serde_json::to_vec(&entries)?.len();
        }

        if evicted > 0 {
            tracing::warn!(
                evicted,
                remaining = entries.len(),
                max_bytes = self.max_bytes,
                "Failed-batch store over capacity, dropped oldest entries"
            );
        }

        self.write(&entries)?;
        Ok(evicted)
    }

    /// Drop everything
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock();
        self.kv.remove(FAILED_DATA_KEY)
    }

    /// Remove exactly the envelopes that were just delivered
    ///
    /// Entries appended after the replay read its snapshot stay in place.
    pub fn remove_delivered(&self, delivered: &[Envelope]) -> Result<()> {
        let _guard = self.lock();

        let ids: HashSet<&str> = delivered.iter().map(|e| e.id.as_str()).collect();
        let mut entries = self.load()?;
        entries.retain(|e| !ids.contains(e.id.as_str()));
        self.write(&entries)
    }

    /// Number of stored envelopes
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Serialized size of the stored array in bytes
    pub fn serialized_size(&self) -> Result<usize> {
        let entries = self.load()?;
        if entries.is_empty() {
            return Ok(0);
        }
        Ok(serde_json::to_vec(&entries)?.len())
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn write(&self, entries: &[Envelope]) -> Result<()> {
        if entries.is_empty() {
            self.kv.remove(FAILED_DATA_KEY)
        } else {
            self.kv.set(FAILED_DATA_KEY, &serde_json::to_value(entries)?)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
