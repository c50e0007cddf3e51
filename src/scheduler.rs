use std::collections::HashMap;
use std::time::Duration;

use crate::ident::ItemId;

/// Pending work keyed by purpose. At most one timer per key exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    Refresh,
    FacetRetry,
    Resize,
    BulkOpen,
    NoteFlush(ItemId),
}

/// Deadlines on the engine clock (time since engine start).
#[derive(Debug, Default)]
pub struct Timers {
    pending: HashMap<TimerKey, Duration>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` at `at`. Returns true when an earlier pending deadline for
    /// the same key was superseded.
    pub fn schedule(&mut self, key: TimerKey, at: Duration) -> bool {
        self.pending.insert(key, at).is_some()
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Duration> {
        self.pending.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.values().min().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns the earliest timer due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<TimerKey> {
        let key = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by(|(ka, a), (kb, b)| a.cmp(b).then_with(|| ka.cmp(kb)))
            .map(|(key, _)| key.clone())?;
        self.pending.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn newer_schedule_replaces_pending_one() {
        let mut timers = Timers::new();
        assert!(!timers.schedule(TimerKey::Refresh, ms(100)));
        assert!(timers.schedule(TimerKey::Refresh, ms(250)));
        assert_eq!(timers.pop_due(ms(200)), None);
        assert_eq!(timers.pop_due(ms(250)), Some(TimerKey::Refresh));
        assert!(timers.is_empty());
    }

    #[test]
    fn due_timers_come_out_in_deadline_order() {
        let mut timers = Timers::new();
        timers.schedule(TimerKey::FacetRetry, ms(300));
        timers.schedule(TimerKey::Refresh, ms(100));
        timers.schedule(TimerKey::Resize, ms(200));
        assert_eq!(timers.next_deadline(), Some(ms(100)));
        let fired: Vec<_> = std::iter::from_fn(|| timers.pop_due(ms(1000))).collect();
        assert_eq!(
            fired,
            vec![TimerKey::Refresh, TimerKey::Resize, TimerKey::FacetRetry]
        );
    }

    #[test]
    fn cancel_removes_pending() {
        let mut timers = Timers::new();
        timers.schedule(TimerKey::BulkOpen, ms(10));
        assert!(timers.cancel(&TimerKey::BulkOpen));
        assert!(!timers.cancel(&TimerKey::BulkOpen));
        assert_eq!(timers.pop_due(ms(100)), None);
    }
}
