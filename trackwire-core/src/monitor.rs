//! Session facade
//!
//! A [`Monitor`] wires one session's [`Formatter`], [`Deduplicator`] and
//! [`Tracker`] together. Producers only ever talk to it.

use std::sync::Arc;

use serde_json::Value;

use crate::capture::CapturedError;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::formatter::{ContextSource, Formatter};
use crate::identity::{resolve_user, DeviceInfo};
use crate::storage::{FailedBatchStore, KeyValueStore};
use crate::tracker::{Tracker, TrackerStats};
use crate::transport::Transport;
use crate::types::{Action, EventType, User};

/// Action name recorded for custom events
const CUSTOM_ACTION: &str = "custom";

/// One reporting session
pub struct Monitor {
    formatter: Formatter,
    dedup: Deduplicator,
    tracker: Tracker,
}

impl Monitor {
    /// Validate `config`, resolve the session identity and start delivery
    ///
    /// Must be called inside a Tokio runtime: the replay timer starts here
    /// and anything left in the failed-batch store is replayed right away.
    pub fn start(
        config: &Config,
        transport: Arc<dyn Transport>,
        kv: Arc<dyn KeyValueStore>,
        context: Arc<dyn ContextSource>,
    ) -> Result<Self> {
        Self::start_with_device(config, transport, kv, context, None)
    }

    /// Like [`Monitor::start`], with device info supplied by the host
    pub fn start_with_device(
        config: &Config,
        transport: Arc<dyn Transport>,
        kv: Arc<dyn KeyValueStore>,
        context: Arc<dyn ContextSource>,
        device: Option<DeviceInfo>,
    ) -> Result<Self> {
        config.validate()?;
        let project_id = config
            .project_id
            .clone()
            .ok_or_else(|| Error::Config("project_id is required".to_string()))?;
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("endpoint is required".to_string()))?;

        let user = resolve_user(kv.as_ref(), config.user_id.as_deref(), device)?;
        let store = Arc::new(FailedBatchStore::new(kv, config.storage.max_failed_bytes));
        let tracker = Tracker::new(config.track.clone(), endpoint, transport, store);
        tracker.start();

        tracing::info!(
            project_id = %project_id,
            user_id = %user.user_id,
            endpoint = %tracker.endpoint(),
            "Monitor started"
        );

        Ok(Self {
            formatter: Formatter::new(project_id, user, context),
            dedup: Deduplicator::new(),
            tracker,
        })
    }

    /// Format one signal and queue it for delivery
    ///
    /// A signal that cannot be formatted is logged and dropped.
    pub fn report(&self, event_type: EventType, event_name: &str, payload: Value) {
        if let Err(e) = self.try_report(event_type, event_name, payload) {
            tracing::warn!(
                event_type = %event_type,
                event_name,
                error = %e,
                "Dropped unformattable event"
            );
        }
    }

    /// Like [`Monitor::report`], but hands the formatting error back
    pub fn try_report(
        &self,
        event_type: EventType,
        event_name: &str,
        payload: Value,
    ) -> Result<()> {
        let envelope = self.formatter.format(event_type, event_name, payload)?;
        self.tracker.send(envelope);
        Ok(())
    }

    /// Record an action on the trail without reporting it
    pub fn push_action(&self, event_name: &str, data: Value) {
        self.formatter.push_action(event_name, data);
    }

    /// Report an application event and remember it on the action trail
    pub fn custom_event(&self, event_name: &str, payload: Value) {
        self.report(EventType::Custom, event_name, payload.clone());
        self.formatter.push_action(CUSTOM_ACTION, payload);
    }

    /// Report a captured error unless the same error was already reported
    ///
    /// Returns whether an envelope was produced. The fingerprint is only
    /// remembered once the envelope was queued.
    pub fn report_error(&self, error: &CapturedError) -> bool {
        let id = error.fingerprint();
        let result = self.dedup.report_once(&id, || {
            self.try_report(EventType::Error, error.event_name(), error.to_payload())
        });

        match result {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(
                    fingerprint = %id,
                    event_name = error.event_name(),
                    "Suppressed duplicate error"
                );
                false
            }
            Err(e) => {
                tracing::warn!(fingerprint = %id, error = %e, "Dropped unformattable error");
                false
            }
        }
    }

    /// Flush everything queued; failures go to the failed-batch store
    pub async fn on_terminate(&self) {
        self.tracker.on_terminate().await;
    }

    pub fn on_network_restored(&self) {
        self.tracker.on_network_restored();
    }

    /// Stop all timers
    pub fn shutdown(&self) {
        self.tracker.shutdown();
    }

    pub fn user(&self) -> &User {
        self.formatter.user()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.formatter.trail_snapshot()
    }

    pub fn stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Distinct errors reported this session
    pub fn reported_errors(&self) -> usize {
        self.dedup.len()
    }
}
