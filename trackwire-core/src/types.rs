//! Core domain types for trackwire
//!
//! These types make up the canonical reported unit (the [`Envelope`]) and the
//! pieces it is assembled from.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Envelope** | One captured signal with identity, page context and payload |
//! | **Event type** | Closed category of a signal (performance, error, behavior, custom) |
//! | **Event name** | Free-form sub-kind within a category (`fcp`, `js-error`, `page_view`) |
//! | **Action** | One entry of the action trail attached to error reports |
//! | **User** | Stable identity plus device/browser/os, fixed for the session |
//! | **Context** | Location, title and referrer of the host page at capture time |

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, wall-clock based.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================
// Event Type
// ============================================

/// Category of a captured signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Performance metric (paint timings, layout shift, ...)
    Performance,
    /// Runtime error; delivered through the immediate lane
    Error,
    /// User behavior (page views, visibility changes, ...)
    Behavior,
    /// Application-defined event
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Performance => "performance",
            EventType::Error => "error",
            EventType::Behavior => "behavior",
            EventType::Custom => "custom",
        }
    }

    /// Whether envelopes of this type carry the action trail.
    pub fn is_error(&self) -> bool {
        matches!(self, EventType::Error)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performance" => Ok(EventType::Performance),
            "error" => Ok(EventType::Error),
            "behavior" => Ok(EventType::Behavior),
            "custom" => Ok(EventType::Custom),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

// ============================================
// Identity and Context
// ============================================

/// Stable identity of the reporting user, set once at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Persisted user identifier
    pub user_id: String,
    /// Device vendor/model (or architecture for non-browser hosts)
    pub device: String,
    /// Browser or host runtime name
    pub browser: String,
    /// Operating system name
    pub os: String,
}

/// Host page state at capture time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    /// Current location
    pub page_url: String,
    /// Current document title
    pub page_title: String,
    /// Location the user arrived from
    pub referrer: String,
}

// ============================================
// Action
// ============================================

/// One recorded user or system action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// What happened (`click`, `custom`, `page_leave`, ...)
    pub event_name: String,
    /// When it happened, milliseconds since epoch
    pub timestamp: i64,
    /// Producer-defined detail
    pub data: serde_json::Value,
}

impl Action {
    /// Create an action stamped with the current time
    pub fn now(event_name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_name: event_name.into(),
            timestamp: now_millis(),
            data,
        }
    }
}

// ============================================
// Envelope
// ============================================

/// The canonical reported unit
///
/// Serialized as-is into the JSON array POSTed to the collection endpoint and
/// into the failed-batch store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Project the event belongs to
    pub project_id: String,
    /// Unique per event, generated at format time
    pub id: String,
    /// Event category
    pub event_type: EventType,
    /// Sub-kind within the category
    pub event_name: String,
    /// Capture time, milliseconds since epoch
    pub timestamp: i64,
    /// Session identity
    pub user: User,
    /// Page state at capture time
    pub context: PageContext,
    /// Producer-defined data; error events also carry `actionStack`
    pub payload: serde_json::Value,
}
