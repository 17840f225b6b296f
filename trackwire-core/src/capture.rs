//! Error producer contract
//!
//! Instrumentation that detects failures (script errors, broken resources,
//! failed requests) describes each occurrence as a [`CapturedError`]. The
//! type knows its event name, its JSON payload and its fingerprint; the
//! [`Monitor`](crate::monitor::Monitor) does the dedup check and reporting.

use serde_json::{json, Value};

use crate::dedup::{fingerprint, status_class};
use crate::types::now_millis;

/// One observed error occurrence
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedError {
    /// Uncaught script error
    Script {
        message: String,
        source: String,
        line: u32,
        column: u32,
        stack: Option<String>,
    },
    /// A script, stylesheet or image failed to load
    Resource {
        tag_name: String,
        url: String,
        outer_html: Option<String>,
    },
    /// A rejected promise nobody handled
    UnhandledRejection { reason: String },
    /// A request completed with a non-2xx status
    Interface {
        url: String,
        method: String,
        status: u16,
        status_text: String,
        duration_ms: u64,
    },
    /// A request never got a response (offline, DNS, CORS)
    Network {
        url: String,
        method: String,
        duration_ms: u64,
        cors: bool,
    },
}

impl CapturedError {
    /// Event name reported under the `error` type
    pub fn event_name(&self) -> &'static str {
        match self {
            CapturedError::Script { .. } => "js-error",
            CapturedError::Resource { .. } => "resource-error",
            CapturedError::UnhandledRejection { .. } => "promise-error",
            CapturedError::Interface { .. } => "interface-error",
            CapturedError::Network { cors: true, .. } => "cors-error",
            CapturedError::Network { cors: false, .. } => "http-error",
        }
    }

    /// Identity of the logical error, independent of when it happened
    pub fn fingerprint(&self) -> String {
        let kind = self.event_name();
        match self {
            CapturedError::Script {
                message,
                source,
                line,
                column,
                ..
            } => {
                let line = line.to_string();
                let column = column.to_string();
                fingerprint(
                    kind,
                    &[message.as_str(), source.as_str(), line.as_str(), column.as_str()],
                )
            }
            CapturedError::Resource { tag_name, url, .. } => {
                fingerprint(kind, &[url.as_str(), tag_name.as_str()])
            }
            CapturedError::UnhandledRejection { reason } => fingerprint(kind, &[reason.as_str()]),
            CapturedError::Interface {
                url, method, status, ..
            } => {
                let class = status_class(*status);
                fingerprint(kind, &[url.as_str(), method.as_str(), class.as_str()])
            }
            CapturedError::Network { url, method, .. } => {
                let class = status_class(0);
                fingerprint(kind, &[url.as_str(), method.as_str(), class.as_str()])
            }
        }
    }

    /// Payload handed to the formatter
    ///
    /// Every occurrence gets its own `errorId`, so two reports of the same
    /// logical error stay distinguishable downstream.
    pub fn to_payload(&self) -> Value {
        let error_id = uuid::Uuid::new_v4().to_string();
        let timestamp = now_millis();
        let kind = self.event_name();

        match self {
            CapturedError::Script {
                message,
                source,
                line,
                column,
                stack,
            } => json!({
                "errorId": error_id,
                "type": kind,
                "message": message,
                "source": source,
                "lineno": line,
                "colno": column,
                "stack": stack,
                "timestamp": timestamp,
            }),
            CapturedError::Resource {
                tag_name,
                url,
                outer_html,
            } => json!({
                "errorId": error_id,
                "type": kind,
                "tagName": tag_name,
                "url": url,
                "outerHTML": outer_html,
                "timestamp": timestamp,
            }),
            CapturedError::UnhandledRejection { reason } => json!({
                "errorId": error_id,
                "type": kind,
                "reason": reason,
                "timestamp": timestamp,
            }),
            CapturedError::Interface {
                url,
                method,
                status,
                status_text,
                duration_ms,
            } => json!({
                "errorId": error_id,
                "type": kind,
                "url": url,
                "method": method,
                "status": status,
                "statusText": status_text,
                "duration": duration_ms,
                "timestamp": timestamp,
            }),
            CapturedError::Network {
                url,
                method,
                duration_ms,
                ..
            } => json!({
                "errorId": error_id,
                "type": kind,
                "url": url,
                "method": method,
                "duration": duration_ms,
                "timestamp": timestamp,
            }),
        }
    }
}
