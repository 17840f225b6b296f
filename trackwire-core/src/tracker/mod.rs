//! Delivery scheduler
//!
//! The [`Tracker`] owns two in-memory lanes. Error envelopes (while realtime
//! delivery is on) go to the immediate lane and are sent on every push;
//! everything else waits in the batched lane until either
//! `batch.max_queue_size` envelopes have accumulated or `batch.delay_ms` has
//! passed since the last push.
//!
//! A batch that fails delivery is retried after `realtime.retry_delay_ms`.
//! Once it has failed `max_retries` times it is appended to the
//! [`FailedBatchStore`], which is replayed at start-up, every
//! `failed_retry_delay_ms`, and whenever connectivity comes back.
//!
//! All timers are Tokio tasks, so every method that may schedule work must
//! be called from inside a Tokio runtime.

mod lane;

pub use lane::{batch_fingerprint, Lane};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::TrackConfig;
use crate::error::Result;
use crate::storage::FailedBatchStore;
use crate::transport::Transport;
use crate::types::Envelope;

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackerStats {
    /// Batches the endpoint accepted (lanes and retries)
    pub batches_sent: usize,
    /// Envelopes in those batches
    pub events_sent: usize,
    /// Delivery attempts that failed
    pub failed_attempts: usize,
    /// Retries scheduled after a failure
    pub retries_scheduled: usize,
    /// Batches written to the failed-batch store
    pub batches_persisted: usize,
    /// Envelopes in those batches
    pub events_persisted: usize,
    /// Replays of the failed-batch store that were accepted
    pub replays_succeeded: usize,
    /// Replays that failed and left the store intact
    pub replays_failed: usize,
}

/// Result of one replay of the failed-batch store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Nothing was stored
    Empty,
    /// This many envelopes were delivered and removed from the store
    Delivered(usize),
    /// Delivery failed; the store is unchanged
    Failed,
    /// Another replay was still running
    InProgress,
}

/// A batch taken off a lane whose delivery task has not started yet
struct HandOff {
    batch: Vec<Envelope>,
    task: JoinHandle<()>,
}

/// A failed batch waiting for its retry timer
struct PendingRetry {
    batch: Vec<Envelope>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct TrackerState {
    immediate: Vec<Envelope>,
    batched: Vec<Envelope>,
    handed_off: HashMap<u64, HandOff>,
    next_hand_off: u64,
    /// Failed attempts per batch fingerprint
    retry_counts: HashMap<String, u32>,
    pending_retries: HashMap<String, PendingRetry>,
    batch_timer: Option<JoinHandle<()>>,
    // Bumped whenever the debounce timer is re-armed or cancelled.
    batch_epoch: u64,
    replay_timer: Option<JoinHandle<()>>,
    stats: TrackerStats,
}

struct Shared {
    config: TrackConfig,
    endpoint: String,
    transport: Arc<dyn Transport>,
    store: Arc<FailedBatchStore>,
    state: Mutex<TrackerState>,
    replaying: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Two-lane delivery scheduler with retry and offline replay
///
/// Cheap to clone; clones share the same lanes and timers.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<Shared>,
}

impl Tracker {
    /// Create a scheduler; no background work starts until [`Tracker::start`]
    pub fn new(
        config: TrackConfig,
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<FailedBatchStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                endpoint: endpoint.into(),
                transport,
                store,
                state: Mutex::new(TrackerState::default()),
                replaying: AtomicBool::new(false),
            }),
        }
    }

    /// Start the periodic replay and replay anything a previous run left behind
    pub fn start(&self) {
        let period = self
            .shared
            .config
            .failed_retry_delay()
            .max(Duration::from_millis(1));
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let tracker = Tracker { shared };
                if let Err(e) = tracker.retry_failed_data().await {
                    tracing::warn!(error = %e, "Scheduled replay of failed batches failed");
                }
            }
        });

        if let Some(previous) = self.shared.lock().replay_timer.replace(handle) {
            previous.abort();
        }

        tracing::debug!(
            endpoint = %self.shared.endpoint,
            replay_period_ms = period.as_millis() as u64,
            "Tracker started"
        );
        self.spawn_replay("startup");
    }

    /// Queue an envelope on its lane
    pub fn send(&self, envelope: Envelope) {
        let lane = Lane::for_event(envelope.event_type, self.shared.config.realtime.enabled);
        tracing::trace!(
            lane = lane.as_str(),
            event_type = %envelope.event_type,
            event_name = %envelope.event_name,
            "Queued envelope"
        );

        match lane {
            Lane::Immediate => {
                let mut state = self.shared.lock();
                state.immediate.push(envelope);
                let batch = std::mem::take(&mut state.immediate);
                hand_off(&self.shared, &mut state, batch, false);
            }
            Lane::Batched => {
                let max = self.shared.config.batch.max_queue_size.max(1);
                let mut state = self.shared.lock();
                state.batched.push(envelope);

                if state.batched.len() >= max {
                    let batch: Vec<Envelope> = state.batched.drain(..max).collect();
                    if state.batched.is_empty() {
                        cancel_batch_timer(&mut state);
                    }
                    // Sent at the next idle point rather than inline
                    hand_off(&self.shared, &mut state, batch, true);
                } else {
                    arm_batch_timer(&self.shared, &mut state);
                }
            }
        }
    }

    /// Final flush when the host is going away
    ///
    /// Cancels the debounce timer, every pending retry and every delivery
    /// task that has not started, then makes one delivery attempt per
    /// non-empty batch. Batches that fail go straight to the failed-batch
    /// store.
    pub async fn on_terminate(&self) {
        let batches = {
            let mut state = self.shared.lock();
            cancel_batch_timer(&mut state);

            let mut handed_off: Vec<(u64, HandOff)> = state.handed_off.drain().collect();
            handed_off.sort_by_key(|(id, _)| *id);
            let mut batches: Vec<Vec<Envelope>> = handed_off
                .into_iter()
                .map(|(_, entry)| {
                    entry.task.abort();
                    entry.batch
                })
                .collect();

            batches.push(std::mem::take(&mut state.immediate));
            batches.push(std::mem::take(&mut state.batched));
            for (_, pending) in state.pending_retries.drain() {
                pending.timer.abort();
                batches.push(pending.batch);
            }
            batches
        };

        let batches: Vec<Vec<Envelope>> = batches.into_iter().filter(|b| !b.is_empty()).collect();
        tracing::debug!(batches = batches.len(), "Termination flush");

        for batch in batches {
            deliver_or_persist(&self.shared, batch).await;
        }
    }

    /// Connectivity came back: replay the failed-batch store now
    pub fn on_network_restored(&self) {
        self.spawn_replay("network restored");
    }

    /// Deliver the whole failed-batch store as one batch
    ///
    /// On success exactly the delivered envelopes are removed; envelopes
    /// persisted while the request was in flight stay for the next replay.
    /// Concurrent calls return [`ReplayOutcome::InProgress`].
    pub async fn retry_failed_data(&self) -> Result<ReplayOutcome> {
        if self.shared.replaying.swap(true, Ordering::AcqRel) {
            return Ok(ReplayOutcome::InProgress);
        }
        let _guard = ReplayGuard(&self.shared.replaying);

        let pending = self.shared.store.load()?;
        if pending.is_empty() {
            return Ok(ReplayOutcome::Empty);
        }

        match self
            .shared
            .transport
            .deliver(&self.shared.endpoint, &pending)
            .await
        {
            Ok(()) => {
                self.shared.store.remove_delivered(&pending)?;
                self.shared.lock().stats.replays_succeeded += 1;
                tracing::info!(batch_len = pending.len(), "Replayed failed batches");
                Ok(ReplayOutcome::Delivered(pending.len()))
            }
            Err(e) => {
                self.shared.lock().stats.replays_failed += 1;
                tracing::warn!(
                    batch_len = pending.len(),
                    error = %e,
                    "Replay of failed batches failed, keeping them"
                );
                Ok(ReplayOutcome::Failed)
            }
        }
    }

    /// Cancel every timer
    ///
    /// Batches waiting for a retry are persisted. Envelopes still in the
    /// lanes stay there; call [`Tracker::on_terminate`] first to flush them.
    pub fn shutdown(&self) {
        let waiting: Vec<Vec<Envelope>> = {
            let mut state = self.shared.lock();
            cancel_batch_timer(&mut state);
            if let Some(timer) = state.replay_timer.take() {
                timer.abort();
            }
            state
                .pending_retries
                .drain()
                .map(|(_, pending)| {
                    pending.timer.abort();
                    pending.batch
                })
                .collect()
        };

        for batch in waiting {
            self.shared.lock().retry_counts.remove(&batch_fingerprint(&batch));
            persist(&self.shared, &batch);
        }
        tracing::debug!("Tracker shut down");
    }

    pub fn stats(&self) -> TrackerStats {
        self.shared.lock().stats.clone()
    }

    /// Envelopes not yet handed to the transport, retries excluded
    pub fn pending_count(&self) -> usize {
        let state = self.shared.lock();
        let handed_off: usize = state.handed_off.values().map(|h| h.batch.len()).sum();
        state.immediate.len() + state.batched.len() + handed_off
    }

    /// Failed attempts recorded for a batch, if it has an open retry record
    pub fn retry_count(&self, fingerprint: &str) -> Option<u32> {
        self.shared.lock().retry_counts.get(fingerprint).copied()
    }

    /// Number of open retry records
    pub fn retry_records(&self) -> usize {
        self.shared.lock().retry_counts.len()
    }

    pub fn store(&self) -> &Arc<FailedBatchStore> {
        &self.shared.store
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    fn spawn_replay(&self, reason: &'static str) {
        let tracker = self.clone();
        tokio::spawn(async move {
            match tracker.retry_failed_data().await {
                Ok(outcome) => tracing::debug!(reason, ?outcome, "Replay finished"),
                Err(e) => tracing::warn!(reason, error = %e, "Replay of failed batches failed"),
            }
        });
    }
}

/// Clears the replay flag when the replay ends, however it ends
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn cancel_batch_timer(state: &mut TrackerState) {
    state.batch_epoch = state.batch_epoch.wrapping_add(1);
    if let Some(timer) = state.batch_timer.take() {
        timer.abort();
    }
}

/// (Re)start the debounce timer for the batched lane
fn arm_batch_timer(shared: &Arc<Shared>, state: &mut TrackerState) {
    cancel_batch_timer(state);
    let epoch = state.batch_epoch;
    let delay = shared.config.batch_delay();
    let task_shared = Arc::clone(shared);

    state.batch_timer = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let batch = {
            let mut state = task_shared.lock();
            if state.batch_epoch != epoch {
                return;
            }
            state.batch_timer = None;
            std::mem::take(&mut state.batched)
        };
        if !batch.is_empty() {
            tracing::debug!(batch_len = batch.len(), "Batch delay elapsed, flushing");
            deliver(task_shared, batch).await;
        }
    }));
}

/// Give a batch to its own delivery task
///
/// The batch stays registered until the task claims it, so a termination
/// flush that runs first still finds it. `defer` makes the task yield once
/// before claiming.
fn hand_off(shared: &Arc<Shared>, state: &mut TrackerState, batch: Vec<Envelope>, defer: bool) {
    let id = state.next_hand_off;
    state.next_hand_off = state.next_hand_off.wrapping_add(1);
    let task_shared = Arc::clone(shared);

    let task = tokio::spawn(async move {
        if defer {
            tokio::task::yield_now().await;
        }
        let batch = task_shared
            .lock()
            .handed_off
            .remove(&id)
            .map(|entry| entry.batch);
        if let Some(batch) = batch {
            deliver(task_shared, batch).await;
        }
    });
    state.handed_off.insert(id, HandOff { batch, task });
}

/// One delivery attempt; failures are retried or persisted
async fn deliver(shared: Arc<Shared>, batch: Vec<Envelope>) {
    if batch.is_empty() {
        return;
    }
    let fingerprint = batch_fingerprint(&batch);

    match shared.transport.deliver(&shared.endpoint, &batch).await {
        Ok(()) => {
            let mut state = shared.lock();
            state.retry_counts.remove(&fingerprint);
            state.stats.batches_sent += 1;
            state.stats.events_sent += batch.len();
        }
        Err(e) => {
            let attempts = {
                let mut state = shared.lock();
                state.stats.failed_attempts += 1;
                let count = state.retry_counts.entry(fingerprint.clone()).or_insert(0);
                *count += 1;
                *count
            };

            if attempts < shared.config.max_retries {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    attempt = attempts,
                    batch_len = batch.len(),
                    error = %e,
                    "Delivery failed, retrying"
                );
                schedule_retry(&shared, fingerprint, batch);
            } else {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    attempt = attempts,
                    batch_len = batch.len(),
                    error = %e,
                    "Delivery failed, retries exhausted"
                );
                shared.lock().retry_counts.remove(&fingerprint);
                persist(&shared, &batch);
            }
        }
    }
}

fn schedule_retry(shared: &Arc<Shared>, fingerprint: String, batch: Vec<Envelope>) {
    let delay = shared.config.retry_delay();
    let task_shared = Arc::clone(shared);
    let key = fingerprint.clone();

    // Registered under the lock so the timer can never miss its own entry
    let mut state = shared.lock();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let batch = task_shared
            .lock()
            .pending_retries
            .remove(&key)
            .map(|pending| pending.batch);
        if let Some(batch) = batch {
            deliver(task_shared, batch).await;
        }
    });

    state.stats.retries_scheduled += 1;
    if let Some(previous) = state
        .pending_retries
        .insert(fingerprint, PendingRetry { batch, timer })
    {
        previous.timer.abort();
    }
}

/// Single attempt with no retry; used by the termination flush
async fn deliver_or_persist(shared: &Shared, batch: Vec<Envelope>) {
    let fingerprint = batch_fingerprint(&batch);
    let result = shared.transport.deliver(&shared.endpoint, &batch).await;

    {
        let mut state = shared.lock();
        state.retry_counts.remove(&fingerprint);
        match result {
            Ok(()) => {
                state.stats.batches_sent += 1;
                state.stats.events_sent += batch.len();
                return;
            }
            Err(ref e) => {
                state.stats.failed_attempts += 1;
                tracing::warn!(
                    fingerprint = %fingerprint,
                    batch_len = batch.len(),
                    error = %e,
                    "Termination flush failed, persisting batch"
                );
            }
        }
    }

    persist(shared, &batch);
}

fn persist(shared: &Shared, batch: &[Envelope]) {
    match shared.store.append(batch) {
        Ok(evicted) => {
            let mut state = shared.lock();
            state.stats.batches_persisted += 1;
            state.stats.events_persisted += batch.len();
            tracing::info!(
                batch_len = batch.len(),
                evicted,
                "Persisted undeliverable batch for replay"
            );
        }
        Err(e) => {
            tracing::error!(
                batch_len = batch.len(),
                error = %e,
                "Failed to persist undeliverable batch, events dropped"
            );
        }
    }
}
