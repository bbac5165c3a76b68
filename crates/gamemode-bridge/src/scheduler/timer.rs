//! Deadline-ordered timer queue.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::registry::WaitId;

/// Position of a timer: deadline first, registration order for ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerKey {
    deadline: Instant,
    seq: u64,
}

impl TimerKey {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Default)]
pub struct TimerQueue {
    next_seq: u64,
    entries: BTreeMap<TimerKey, WaitId>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deadline: Instant, wait: WaitId) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, wait);
        key
    }

    pub fn remove(&mut self, key: &TimerKey) -> Option<WaitId> {
        self.entries.remove(key)
    }

    /// Remove and return every wait whose deadline is at or before `now`,
    /// in deadline order (registration order for equal deadlines).
    pub fn pop_due(&mut self, now: Instant) -> Vec<WaitId> {
        let later = self.entries.split_off(&TimerKey {
            deadline: now,
            seq: u64::MAX,
        });
        let due = std::mem::replace(&mut self.entries, later);
        due.into_values().collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(TimerKey::deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::time::Duration;

    #[test]
    fn pops_in_deadline_order_regardless_of_insertion() {
        let mut registry = Registry::new();
        let mut timers = TimerQueue::new();
        let base = Instant::now();

        let w3 = registry.register_wait(None, None);
        let w1 = registry.register_wait(None, None);
        let w2 = registry.register_wait(None, None);
        timers.insert(base + Duration::from_millis(30), w3);
        timers.insert(base + Duration::from_millis(10), w1);
        timers.insert(base + Duration::from_millis(20), w2);

        assert_eq!(timers.next_deadline(), Some(base + Duration::from_millis(10)));
        assert_eq!(
            timers.pop_due(base + Duration::from_millis(30)),
            vec![w1, w2, w3]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn equal_deadlines_keep_registration_order() {
        let mut registry = Registry::new();
        let mut timers = TimerQueue::new();
        let deadline = Instant::now() + Duration::from_millis(5);

        let ids: Vec<WaitId> = (0..4).map(|_| registry.register_wait(None, None)).collect();
        for id in &ids {
            timers.insert(deadline, *id);
        }

        assert_eq!(timers.pop_due(deadline), ids);
    }

    #[test]
    fn future_deadlines_stay_queued() {
        let mut registry = Registry::new();
        let mut timers = TimerQueue::new();
        let base = Instant::now();

        let soon = registry.register_wait(None, None);
        let later = registry.register_wait(None, None);
        timers.insert(base + Duration::from_millis(1), soon);
        let later_key = timers.insert(base + Duration::from_millis(50), later);

        assert_eq!(timers.pop_due(base + Duration::from_millis(10)), vec![soon]);
        assert_eq!(timers.len(), 1);
        assert!(timers.pop_due(base + Duration::from_millis(10)).is_empty());

        assert_eq!(timers.remove(&later_key), Some(later));
        assert!(timers.is_empty());
    }
}
