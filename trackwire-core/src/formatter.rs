//! Event formatting
//!
//! Turns a producer's `(event_type, event_name, payload)` triple into an
//! [`Envelope`]. The formatter owns the session's [`ActionTrail`]; error
//! envelopes get a copy of it under `payload.actionStack`.
//!
//! Page context is read through a [`ContextSource`] on every call and never
//! cached, since the host page may navigate between two events.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::action_trail::ActionTrail;
use crate::error::{Error, Result};
use crate::types::{now_millis, Action, Envelope, EventType, PageContext, User};

/// Payload key holding the action trail on error envelopes
pub const ACTION_STACK_KEY: &str = "actionStack";

/// Source of the host page state
pub trait ContextSource: Send + Sync {
    /// Current location, title and referrer
    fn context(&self) -> PageContext;
}

/// Mutable page state kept by the platform adapter
///
/// `navigate` moves the current location into `referrer`, mirroring what a
/// browser reports after an in-app route change.
#[derive(Debug, Default)]
pub struct PageState {
    current: RwLock<PageContext>,
}

impl PageState {
    pub fn new(page_url: impl Into<String>, page_title: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(PageContext {
                page_url: page_url.into(),
                page_title: page_title.into(),
                referrer: String::new(),
            }),
        }
    }

    /// Record a route change
    pub fn navigate(&self, page_url: impl Into<String>, page_title: impl Into<String>) {
        let mut ctx = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::take(&mut ctx.page_url);
        ctx.referrer = previous;
        ctx.page_url = page_url.into();
        ctx.page_title = page_title.into();
    }

    pub fn set_title(&self, page_title: impl Into<String>) {
        let mut ctx = self.current.write().unwrap_or_else(PoisonError::into_inner);
        ctx.page_title = page_title.into();
    }
}

impl ContextSource for PageState {
    fn context(&self) -> PageContext {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Builds envelopes for one session
pub struct Formatter {
    project_id: String,
    user: User,
    trail: Mutex<ActionTrail>,
    context: Arc<dyn ContextSource>,
}

impl Formatter {
    pub fn new(project_id: impl Into<String>, user: User, context: Arc<dyn ContextSource>) -> Self {
        Self::with_trail(project_id, user, context, ActionTrail::default())
    }

    pub fn with_trail(
        project_id: impl Into<String>,
        user: User,
        context: Arc<dyn ContextSource>,
        trail: ActionTrail,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            user,
            trail: Mutex::new(trail),
            context,
        }
    }

    /// Build the envelope for one captured signal
    ///
    /// `payload` must be a JSON object (or null, treated as empty). Anything
    /// else is a producer bug and yields [`Error::Format`].
    pub fn format(
        &self,
        event_type: EventType,
        event_name: &str,
        payload: Value,
    ) -> Result<Envelope> {
        let mut payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Format(format!(
                    "payload for {}/{} must be an object, got {}",
                    event_type,
                    event_name,
                    json_kind(&other)
                )))
            }
        };

        if event_type.is_error() {
            let stack = serde_json::to_value(self.trail_snapshot())?;
            payload.insert(ACTION_STACK_KEY.to_string(), stack);
        }

        Ok(Envelope {
            project_id: self.project_id.clone(),
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            event_name: event_name.to_string(),
            timestamp: now_millis(),
            user: self.user.clone(),
            context: self.context.context(),
            payload: Value::Object(payload),
        })
    }

    /// Record an action on the trail without reporting anything
    pub fn push_action(&self, event_name: &str, data: Value) {
        self.lock_trail().push(Action::now(event_name, data));
    }

    pub fn trail_snapshot(&self) -> Vec<Action> {
        self.lock_trail().snapshot()
    }

    pub fn recent_actions(&self, count: usize) -> Vec<Action> {
        self.lock_trail().recent(count)
    }

    /// Explicit reset; not part of normal operation
    pub fn clear_actions(&self) {
        self.lock_trail().clear();
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn lock_trail(&self) -> std::sync::MutexGuard<'_, ActionTrail> {
        self.trail.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn test_user() -> User {
        User {
            user_id: "user-1".to_string(),
            device: "x86_64".to_string(),
            browser: "test".to_string(),
            os: "linux".to_string(),
        }
    }

    fn formatter() -> (Formatter, Arc<PageState>) {
        let page = Arc::new(PageState::new("https://app.test/", "Home"));
        (Formatter::new("proj-1", test_user(), page.clone()), page)
    }

    #[test]
    fn test_format_stamps_identity_and_context() {
        let (formatter, _) = formatter();
        let env = formatter
            .format(EventType::Performance, "fcp", json!({"value": 120.5}))
            .unwrap();

        assert_eq!(env.project_id, "proj-1");
        assert_eq!(env.event_type, EventType::Performance);
        assert_eq!(env.event_name, "fcp");
        assert_eq!(env.user.user_id, "user-1");
        assert_eq!(env.context.page_url, "https://app.test/");
        assert_eq!(env.payload["value"], 120.5);
        assert!(env.timestamp > 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let (formatter, _) = formatter();
        let ids: HashSet<_> = (0..500)
            .map(|_| formatter.format(EventType::Behavior, "click", json!({})).unwrap().id)
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_context_is_read_fresh() {
        let (formatter, page) = formatter();
        let first = formatter.format(EventType::Behavior, "page_view", Value::Null).unwrap();

        page.navigate("https://app.test/settings", "Settings");
        let second = formatter.format(EventType::Behavior, "page_view", Value::Null).unwrap();

        assert_eq!(first.context.page_url, "https://app.test/");
        assert_eq!(second.context.page_url, "https://app.test/settings");
        assert_eq!(second.context.referrer, "https://app.test/");
        assert_eq!(second.context.page_title, "Settings");
    }

    #[test]
    fn test_error_envelope_carries_action_stack() {
        let (formatter, _) = formatter();
        formatter.push_action("click", json!({"target": "#buy"}));
        formatter.push_action("custom", json!({"step": 2}));

        let env = formatter
            .format(EventType::Error, "js-error", json!({"message": "boom"}))
            .unwrap();

        let stack = env.payload[ACTION_STACK_KEY].as_array().unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0]["event_name"], "click");
        assert_eq!(env.payload["message"], "boom");
    }

    #[test]
    fn test_error_envelope_with_empty_trail_still_has_stack() {
        let (formatter, _) = formatter();
        let env = formatter.format(EventType::Error, "js-error", Value::Null).unwrap();
        assert_eq!(env.payload[ACTION_STACK_KEY], json!([]));
    }

    #[test]
    fn test_non_error_envelopes_have_no_action_stack() {
        let (formatter, _) = formatter();
        formatter.push_action("click", json!({}));

        for ty in [EventType::Performance, EventType::Behavior, EventType::Custom] {
            let env = formatter.format(ty, "x", json!({})).unwrap();
            assert!(env.payload.get(ACTION_STACK_KEY).is_none());
        }
    }

    #[test]
    fn test_later_pushes_do_not_mutate_formatted_envelope() {
        let (formatter, _) = formatter();
        formatter.push_action("click", json!({}));
        let env = formatter.format(EventType::Error, "js-error", json!({})).unwrap();

        formatter.push_action("scroll", json!({}));

        assert_eq!(env.payload[ACTION_STACK_KEY].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        let (formatter, _) = formatter();
        let err = formatter
            .format(EventType::Custom, "signup", json!([1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
