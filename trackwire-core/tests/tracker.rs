//! Delivery scheduler behavior under a paused clock

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::advance;
use trackwire_core::config::TrackConfig;
use trackwire_core::storage::{FailedBatchStore, MemoryStore};
use trackwire_core::{Envelope, EventType, ReplayOutcome, Result, Tracker, Transport};

use common::{envelope, settle, ScriptedTransport, ENDPOINT};

fn track_config() -> TrackConfig {
    common::config().track
}

fn tracker_with(
    config: TrackConfig,
    transport: Arc<dyn Transport>,
) -> (Tracker, Arc<FailedBatchStore>) {
    let store = Arc::new(FailedBatchStore::new(Arc::new(MemoryStore::new()), 1024 * 1024));
    let tracker = Tracker::new(config, ENDPOINT, transport, Arc::clone(&store));
    (tracker, store)
}

async fn wait(ms: u64) {
    advance(Duration::from_millis(ms)).await;
    settle().await;
}

// ============================================
// Lanes
// ============================================

#[tokio::test(start_paused = true)]
async fn test_error_is_sent_immediately() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    // Waits on the debounce timer
    tracker.send(envelope(EventType::Behavior, 1));
    settle().await;

    tracker.send(envelope(EventType::Error, 2));
    settle().await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 1);
    assert_eq!(attempts[0][0].event_type, EventType::Error);
    assert_eq!(tracker.pending_count(), 1);

    wait(1000).await;
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1][0].id, "env-0001");
    assert_eq!(tracker.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_flushes_without_waiting() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    for n in 0..10 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    settle().await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 10);

    // Buffer was emptied, so the debounce timer has nothing to send
    wait(5000).await;
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_starts_next_batch() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    for n in 0..11 {
        tracker.send(envelope(EventType::Performance, n));
    }
    settle().await;
    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(tracker.pending_count(), 1);

    wait(1000).await;
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].len(), 1);
    assert_eq!(attempts[1][0].id, "env-0010");
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_flushes_after_delay() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    for n in 0..3 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    settle().await;

    wait(999).await;
    assert_eq!(transport.attempt_count(), 0);

    wait(1).await;
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_each_push_restarts_delay() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    tracker.send(envelope(EventType::Behavior, 1));
    settle().await;
    wait(600).await;

    tracker.send(envelope(EventType::Behavior, 2));
    settle().await;
    wait(600).await;
    assert_eq!(transport.attempt_count(), 0);

    wait(400).await;
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_realtime_disabled_batches_errors() {
    let transport = ScriptedTransport::healthy();
    let mut config = track_config();
    config.realtime.enabled = false;
    let (tracker, _) = tracker_with(config, transport.clone());

    tracker.send(envelope(EventType::Error, 1));
    settle().await;
    assert_eq!(transport.attempt_count(), 0);

    wait(1000).await;
    assert_eq!(transport.attempt_count(), 1);
}

// ============================================
// Retry
// ============================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_persist_once() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    tracker.send(envelope(EventType::Error, 1));
    settle().await;
    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(tracker.retry_records(), 1);

    wait(3000).await;
    assert_eq!(transport.attempt_count(), 2);
    assert!(store.is_empty().unwrap());

    wait(3000).await;
    assert_eq!(transport.attempt_count(), 3);

    // Third failure hands the batch to the store and forgets it
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.load().unwrap()[0].id, "env-0001");
    assert_eq!(tracker.retry_records(), 0);

    wait(30_000).await;
    assert_eq!(transport.attempt_count(), 3);
    assert_eq!(store.len().unwrap(), 1);

    let stats = tracker.stats();
    assert_eq!(stats.failed_attempts, 3);
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.batches_persisted, 1);
    assert_eq!(stats.batches_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_transient_failure() {
    let transport = ScriptedTransport::failing_times(1);
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    let batch_member = envelope(EventType::Error, 7);
    let fingerprint =
        trackwire_core::tracker::batch_fingerprint(std::slice::from_ref(&batch_member));
    tracker.send(batch_member);
    settle().await;
    assert_eq!(tracker.retry_count(&fingerprint), Some(1));

    wait(2999).await;
    assert_eq!(transport.attempt_count(), 1);

    wait(1).await;
    assert_eq!(transport.attempt_count(), 2);
    assert_eq!(tracker.retry_count(&fingerprint), None);
    assert!(store.is_empty().unwrap());

    let stats = tracker.stats();
    assert_eq!(stats.batches_sent, 1);
    assert_eq!(stats.events_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batched_lane_retries_too() {
    let transport = ScriptedTransport::failing_times(2);
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    for n in 0..4 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    settle().await;
    wait(1000).await;
    wait(3000).await;
    wait(3000).await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|batch| batch.len() == 4));
    assert!(store.is_empty().unwrap());
    assert_eq!(tracker.retry_records(), 0);
}

// ============================================
// Termination
// ============================================

#[tokio::test(start_paused = true)]
async fn test_terminate_flushes_batch_in_one_attempt() {
    let transport = ScriptedTransport::healthy();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    for n in 0..5 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    settle().await;

    tracker.on_terminate().await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 5);
    assert_eq!(tracker.pending_count(), 0);
    assert!(store.is_empty().unwrap());

    // Debounce timer was cancelled
    wait(5000).await;
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_failure_persists_without_retry() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    // Fails once and waits for its retry
    tracker.send(envelope(EventType::Error, 100));
    for n in 0..5 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    settle().await;
    assert_eq!(transport.attempt_count(), 1);

    tracker.on_terminate().await;

    // One attempt for the batched lane, one for the waiting retry
    assert_eq!(transport.attempt_count(), 3);
    assert_eq!(store.len().unwrap(), 6);
    assert_eq!(tracker.retry_records(), 0);

    wait(30_000).await;
    assert_eq!(transport.attempt_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_claims_error_before_its_task_runs() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    tracker.send(envelope(EventType::Error, 1));
    assert_eq!(tracker.pending_count(), 1);
    tracker.on_terminate().await;

    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(tracker.pending_count(), 0);

    // The abandoned delivery task never sends a second copy
    wait(30_000).await;
    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_claims_full_batch_before_its_task_runs() {
    let transport = ScriptedTransport::healthy();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    for n in 0..10 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    tracker.on_terminate().await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].len(), 10);
    assert!(store.is_empty().unwrap());

    settle().await;
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_keeps_hand_off_order() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    for n in 0..11 {
        tracker.send(envelope(EventType::Behavior, n));
    }
    tracker.send(envelope(EventType::Error, 99));
    tracker.on_terminate().await;

    // Full batch, then the error, then the partial batch
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].len(), 10);
    assert_eq!(attempts[1][0].id, "env-0099");
    assert_eq!(attempts[2][0].id, "env-0010");
    assert_eq!(store.len().unwrap(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_with_nothing_queued() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    tracker.on_terminate().await;
    assert_eq!(transport.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_persists_waiting_retries() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());

    tracker.send(envelope(EventType::Error, 1));
    settle().await;
    tracker.shutdown();

    assert_eq!(store.len().unwrap(), 1);
    wait(30_000).await;
    assert_eq!(transport.attempt_count(), 1);
}

// ============================================
// Replay
// ============================================

#[tokio::test(start_paused = true)]
async fn test_start_replays_leftovers() {
    let transport = ScriptedTransport::healthy();
    let (tracker, store) = tracker_with(track_config(), transport.clone());
    let leftovers: Vec<Envelope> = (0..5).map(|n| envelope(EventType::Behavior, n)).collect();
    store.append(&leftovers).unwrap();

    tracker.start();
    settle().await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0], leftovers);
    assert!(store.is_empty().unwrap());
    assert_eq!(tracker.stats().replays_succeeded, 1);
    tracker.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_failed_replay_keeps_store_until_next_interval() {
    let transport = ScriptedTransport::failing();
    let (tracker, store) = tracker_with(track_config(), transport.clone());
    store
        .append(&[envelope(EventType::Error, 1), envelope(EventType::Custom, 2)])
        .unwrap();

    tracker.start();
    settle().await;
    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(store.len().unwrap(), 2);

    transport.set_failures(0);
    wait(59_999).await;
    assert_eq!(transport.attempt_count(), 1);

    wait(1).await;
    assert_eq!(transport.attempt_count(), 2);
    assert!(store.is_empty().unwrap());

    let stats = tracker.stats();
    assert_eq!(stats.replays_failed, 1);
    assert_eq!(stats.replays_succeeded, 1);
    tracker.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_network_restored_replays_now() {
    let transport = ScriptedTransport::healthy();
    let (tracker, store) = tracker_with(track_config(), transport.clone());
    store.append(&[envelope(EventType::Behavior, 1)]).unwrap();

    tracker.on_network_restored();
    settle().await;

    assert_eq!(transport.attempt_count(), 1);
    assert!(store.is_empty().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_replay_of_empty_store_sends_nothing() {
    let transport = ScriptedTransport::healthy();
    let (tracker, _) = tracker_with(track_config(), transport.clone());

    assert_eq!(tracker.retry_failed_data().await.unwrap(), ReplayOutcome::Empty);
    assert_eq!(transport.attempt_count(), 0);
}

/// Holds every delivery until released
#[derive(Default)]
struct GatedTransport {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn deliver(&self, _endpoint: &str, _batch: &[Envelope]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_replay_is_single_flight_and_keeps_late_appends() {
    let transport = Arc::new(GatedTransport::default());
    let (tracker, store) = tracker_with(track_config(), transport.clone());
    store
        .append(&[envelope(EventType::Behavior, 1), envelope(EventType::Behavior, 2)])
        .unwrap();

    let first = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.retry_failed_data().await })
    };
    settle().await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    assert_eq!(
        tracker.retry_failed_data().await.unwrap(),
        ReplayOutcome::InProgress
    );

    // Persisted while the replay is in flight
    store.append(&[envelope(EventType::Behavior, 3)]).unwrap();
    transport.gate.notify_one();

    assert_eq!(first.await.unwrap().unwrap(), ReplayOutcome::Delivered(2));
    let remaining = store.load().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "env-0003");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}
