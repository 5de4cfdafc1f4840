//! Ordered timer set for deadline management.
//!
//! Entries are keyed by `(deadline, generation)`, so equal deadlines fire in
//! insertion order and any entry can be removed again through the
//! [`TimerKey`] returned by [`TimerHeap::insert`].

use std::collections::BTreeMap;
use std::task::Waker;
use std::time::Instant;

/// Identifies one registration in a [`TimerHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    deadline: Instant,
    generation: u64,
}

impl TimerKey {
    /// The deadline the registration fires at.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Wakers ordered by deadline, earliest first.
#[derive(Debug, Default)]
pub struct TimerHeap {
    entries: BTreeMap<TimerKey, Waker>,
    next_generation: u64,
}

impl TimerHeap {
    /// Creates a new empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a waker to fire at `deadline`.
    pub fn insert(&mut self, deadline: Instant, waker: Waker) -> TimerKey {
        let key = TimerKey {
            deadline,
            generation: self.next_generation,
        };
        self.next_generation += 1;
        self.entries.insert(key, waker);
        key
    }

    /// Removes a pending registration and hands back its waker. Returns
    /// `None` if it already fired or was removed.
    pub fn remove(&mut self, key: TimerKey) -> Option<Waker> {
        self.entries.remove(&key)
    }

    /// Returns the earliest deadline, if any.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|(key, _)| key.deadline)
    }

    /// Pops all wakers whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<Waker> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            expired.push(entry.remove());
        }
        expired
    }
}
