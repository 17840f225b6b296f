//! Lane routing and batch fingerprints

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::{Envelope, EventType};

/// Queue an envelope waits in before delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Flushed on every push
    Immediate,
    /// Flushed on size or after the debounce delay
    Batched,
}

impl Lane {
    /// Errors go to the immediate lane unless realtime delivery is disabled
    pub fn for_event(event_type: EventType, realtime_enabled: bool) -> Self {
        if realtime_enabled && event_type.is_error() {
            Lane::Immediate
        } else {
            Lane::Batched
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Immediate => "immediate",
            Lane::Batched => "batched",
        }
    }
}

/// Key for retry bookkeeping of a batch
///
/// Hashes the `(event_type, timestamp, id)` of every member in order. Not
/// cryptographic; a collision only means a missed retry-count reset.
pub fn batch_fingerprint(batch: &[Envelope]) -> String {
    let mut hasher = DefaultHasher::new();
    batch.len().hash(&mut hasher);
    for envelope in batch {
        envelope.event_type.as_str().hash(&mut hasher);
        envelope.timestamp.hash(&mut hasher);
        envelope.id.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
