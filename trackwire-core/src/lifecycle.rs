//! Page lifecycle producer
//!
//! Translates navigation and visibility signals from the host into behavior
//! events. Hiding or leaving the page runs the termination flush, since
//! either may be the last chance the host gets to send anything.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::formatter::PageState;
use crate::monitor::Monitor;
use crate::types::{now_millis, EventType};

/// Stays shorter than this are not reported on leave
pub const MIN_STAY: Duration = Duration::from_millis(100);

pub struct PageLifecycle {
    monitor: Arc<Monitor>,
    page: Arc<PageState>,
    entered_at: Mutex<Instant>,
}

impl PageLifecycle {
    /// `page` must be the same state the monitor's formatter reads
    pub fn new(monitor: Arc<Monitor>, page: Arc<PageState>) -> Self {
        Self {
            monitor,
            page,
            entered_at: Mutex::new(Instant::now()),
        }
    }

    /// In-app navigation: update the page state and report a page view
    pub fn route_changed(&self, url: &str, title: &str) {
        self.page.navigate(url, title);
        *self.entered() = Instant::now();

        self.monitor.report(
            EventType::Behavior,
            "page_view",
            json!({
                "url": url,
                "title": title,
                "timestamp": now_millis(),
            }),
        );
    }

    pub async fn visibility_changed(&self, hidden: bool) {
        let event_name = if hidden { "page_hidden" } else { "page_visible" };
        self.monitor.report(
            EventType::Behavior,
            event_name,
            json!({ "timestamp": now_millis() }),
        );

        if hidden {
            self.monitor.on_terminate().await;
        }
    }

    /// The page is being unloaded
    pub async fn leave(&self) {
        let stay = self.entered().elapsed();
        if stay > MIN_STAY {
            let payload = json!({ "stayTime": stay.as_millis() as u64 });
            self.monitor.push_action("page_leave", payload.clone());
            self.monitor.report(EventType::Behavior, "page_leave", payload);
        }

        self.monitor.on_terminate().await;
    }

    fn entered(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.entered_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
