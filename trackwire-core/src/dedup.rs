//! Error fingerprinting and deduplication
//!
//! A fingerprint identifies one logical error: the same script error thrown
//! from the same place, or the same resource failing with the same class of
//! status. The [`Deduplicator`] remembers every fingerprint it has let through
//! for the lifetime of the process; a recurring error is reported once per
//! session, never once per time window.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::error::Result;

// Unit separator keeps ("ab", "c") and ("a", "bc") apart.
const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// Compute the fingerprint of an error
///
/// `kind` is the error class (`js-error`, `resource-error`, ...) and `fields`
/// its stable discriminators. Returns a 32-character hex digest.
pub fn fingerprint(kind: &str, fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for field in fields {
        hasher.update(FIELD_SEPARATOR);
        hasher.update(field.as_bytes());
    }
    let result = hasher.finalize();

    // Take first 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

/// Collapse an HTTP status to its class (`404` -> `4xx`)
///
/// Status 0 (no response at all) maps to `none`.
pub fn status_class(status: u16) -> String {
    match status {
        0 => "none".to_string(),
        s => format!("{}xx", s / 100),
    }
}

/// Process-lifetime set of reported fingerprints
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` has never been marked seen
    pub fn should_report(&self, id: &str) -> bool {
        !self.lock().contains(id)
    }

    /// Record `id` as reported; returns false if it already was
    pub fn mark_seen(&self, id: &str) -> bool {
        self.lock().insert(id.to_string())
    }

    /// Run `emit` only if `id` is new, marking it seen once `emit` succeeds
    ///
    /// The set stays locked for the whole check-emit-mark sequence, so two
    /// captures of the same error racing each other produce a single emit.
    /// Returns whether `emit` ran and succeeded.
    pub fn report_once<F>(&self, id: &str, emit: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut seen = self.lock();
        if seen.contains(id) {
            return Ok(false);
        }
        emit()?;
        seen.insert(id.to_string());
        Ok(true)
    }

    /// Number of distinct fingerprints reported so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
