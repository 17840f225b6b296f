//! Bounded history of recent actions
//!
//! The trail is attached to every error envelope so the report shows what
//! the user did right before the failure.

use std::collections::VecDeque;

use crate::types::Action;

/// Default number of actions kept
pub const DEFAULT_CAPACITY: usize = 100;

/// Capacity-bounded FIFO of [`Action`]s
#[derive(Debug, Clone)]
pub struct ActionTrail {
    actions: VecDeque<Action>,
    capacity: usize,
}

impl Default for ActionTrail {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActionTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append an action, evicting the oldest ones past capacity
    pub fn push(&mut self, action: Action) {
        self.actions.push_back(action);
        self.trim_excess();
    }

    /// Copy of the whole trail, oldest first
    pub fn snapshot(&self) -> Vec<Action> {
        self.actions.iter().cloned().collect()
    }

    /// The last `count` actions, oldest first
    pub fn recent(&self, count: usize) -> Vec<Action> {
        let skip = self.actions.len().saturating_sub(count);
        self.actions.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Change the capacity; takes effect on the next push
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    // Drops as many entries as needed, not just one, so a lowered capacity is
    // honoured by the very next push.
    fn trim_excess(&mut self) {
        if self.actions.len() > self.capacity {
            let excess = self.actions.len() - self.capacity;
            self.actions.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(n: i64) -> Action {
        Action {
            event_name: format!("action-{}", n),
            timestamp: n,
            data: serde_json::json!({ "n": n }),
        }
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(ActionTrail::default().capacity(), 100);
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut trail = ActionTrail::new(3);
        for n in 0..5 {
            trail.push(action(n));
        }

        let names: Vec<_> = trail.snapshot().into_iter().map(|a| a.timestamp).collect();
        assert_eq!(names, vec![2, 3, 4]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut trail = ActionTrail::new(10);
        for n in 0..250 {
            trail.push(action(n));
            assert!(trail.len() <= 10);
        }
    }

    #[test]
    fn test_lowered_capacity_trims_on_next_push() {
        let mut trail = ActionTrail::new(10);
        for n in 0..10 {
            trail.push(action(n));
        }

        trail.set_capacity(4);
        trail.push(action(10));

        assert_eq!(trail.len(), 4);
        assert_eq!(trail.snapshot()[0].timestamp, 7);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut trail = ActionTrail::new(5);
        trail.push(action(1));
        let snapshot = trail.snapshot();

        trail.push(action(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn test_recent() {
        let mut trail = ActionTrail::new(10);
        for n in 0..6 {
            trail.push(action(n));
        }

        let recent: Vec<_> = trail.recent(2).into_iter().map(|a| a.timestamp).collect();
        assert_eq!(recent, vec![4, 5]);
        assert_eq!(trail.recent(50).len(), 6);
        assert!(trail.recent(0).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut trail = ActionTrail::new(5);
        trail.push(action(1));
        trail.clear();
        assert!(trail.is_empty());
    }
}
