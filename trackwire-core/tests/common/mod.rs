//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use trackwire_core::config::Config;
use trackwire_core::{Envelope, Error, EventType, PageContext, Result, Transport, User};

pub const ENDPOINT: &str = "http://collector.test";

/// Transport that records every attempt and fails on demand
#[derive(Default)]
pub struct ScriptedTransport {
    attempts: Mutex<Vec<Vec<Envelope>>>,
    // usize::MAX means fail forever
    failures_left: AtomicUsize,
}

impl ScriptedTransport {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Self::failing_times(usize::MAX)
    }

    pub fn failing_times(n: usize) -> Arc<Self> {
        let transport = Self::default();
        transport.failures_left.store(n, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_failures(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Vec<Envelope>> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Every envelope handed over, in order
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.attempts().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn deliver(&self, _endpoint: &str, batch: &[Envelope]) -> Result<()> {
        self.attempts.lock().unwrap().push(batch.to_vec());

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(n),
                n => Some(n - 1),
            })
            .is_ok();

        if fail {
            Err(Error::Transport("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

pub fn envelope(event_type: EventType, n: usize) -> Envelope {
    Envelope {
        project_id: "proj".to_string(),
        id: format!("env-{:04}", n),
        event_type,
        event_name: format!("event-{}", n),
        timestamp: 1_700_000_000_000 + n as i64,
        user: User {
            user_id: "user-1".to_string(),
            device: "x86_64".to_string(),
            browser: "test".to_string(),
            os: "linux".to_string(),
        },
        context: PageContext::default(),
        payload: json!({ "n": n }),
    }
}

pub fn config() -> Config {
    let mut config = Config {
        project_id: Some("proj".to_string()),
        endpoint: Some(ENDPOINT.to_string()),
        ..Default::default()
    };
    config.track.batch.delay_ms = 1000;
    config.track.batch.max_queue_size = 10;
    config.track.realtime.retry_delay_ms = 3000;
    config.track.max_retries = 3;
    config.track.failed_retry_delay_ms = 60_000;
    config
}

/// Let spawned tasks run without moving the paused clock
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
