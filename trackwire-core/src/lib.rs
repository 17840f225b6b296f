//! # trackwire-core
//!
//! Client-side telemetry pipeline: capture, format, deduplicate, batch and
//! deliver events to a collection endpoint without losing them when the
//! network or the process goes away.
//!
//! This library provides:
//! - Domain types for envelopes, actions and session identity
//! - The event formatter with its bounded action trail
//! - Error fingerprinting and per-session deduplication
//! - A two-lane delivery scheduler with retry and offline replay
//! - Durable storage for undeliverable batches (SQLite or in-memory)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Producers hand `(event_type, event_name, payload)` to the [`Monitor`]:
//! - **Formatter:** builds the [`Envelope`], attaching identity, page context
//!   and (for errors) the action trail
//! - **Tracker:** queues it on the immediate or batched lane and delivers it
//!   through a [`Transport`]
//! - **Failed-batch store:** keeps batches that exhausted their retries until
//!   a later replay gets them through
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trackwire_core::{Config, EventType, HttpTransport, Monitor, PageState, SqliteStore};
//!
//! # async fn run() -> trackwire_core::Result<()> {
//! let config = Config::load()?;
//!
//! let store = SqliteStore::open(&config.storage.database_path())?;
//! store.migrate()?;
//!
//! let transport = Arc::new(HttpTransport::new(&config.transport)?);
//! let page = Arc::new(PageState::new("https://app.example/", "Home"));
//! let monitor = Monitor::start(&config, transport, Arc::new(store), page)?;
//!
//! monitor.report(EventType::Behavior, "click", serde_json::json!({ "target": "buy" }));
//! monitor.on_terminate().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use capture::CapturedError;
pub use config::Config;
pub use error::{Error, Result};
pub use formatter::{ContextSource, Formatter, PageState};
pub use monitor::Monitor;
pub use storage::{FailedBatchStore, KeyValueStore, MemoryStore, SqliteStore};
pub use tracker::{ReplayOutcome, Tracker, TrackerStats};
pub use transport::{HttpTransport, Transport};
pub use types::*;

// Public modules
pub mod action_trail;
pub mod capture;
pub mod config;
pub mod dedup;
pub mod error;
pub mod formatter;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod storage;
pub mod tracker;
pub mod transport;
pub mod types;
