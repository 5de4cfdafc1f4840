//! Registry of parked wakers shared by the synchronization primitives.
//!
//! Each waiting future owns a slot key for as long as it is alive. Waking
//! takes the waker out of the slot but leaves the slot allocated, so a
//! stale key can never alias another waiter's registration. The owner
//! releases its slot on completion or drop via [`WaitQueue::deregister`].
//!
//! Wakers are returned in a batch so callers can wake them after releasing
//! whatever lock guards the queue.

use slab::Slab;
use smallvec::SmallVec;
use std::task::Waker;

/// Batch of wakers taken out of a queue, woken outside the lock.
pub(crate) type WakeBatch = SmallVec<[Waker; 4]>;

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    slots: Slab<Option<Waker>>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers (or refreshes) the waker stored under `key`.
    pub(crate) fn register(&mut self, key: &mut Option<usize>, waker: &Waker) {
        if let Some(slot) = key.and_then(|k| self.slots.get_mut(k)) {
            match slot {
                Some(existing) if existing.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
            return;
        }
        *key = Some(self.slots.insert(Some(waker.clone())));
    }

    /// Releases the slot owned by `key`.
    pub(crate) fn deregister(&mut self, key: &mut Option<usize>) {
        if let Some(k) = key.take() {
            self.slots.try_remove(k);
        }
    }

    /// Takes every registered waker.
    pub(crate) fn take_all(&mut self) -> WakeBatch {
        self.slots
            .iter_mut()
            .filter_map(|(_, slot)| slot.take())
            .collect()
    }

    /// Number of live registrations (woken or not).
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Wakes every waker in the batch.
pub(crate) fn wake_all(batch: WakeBatch) {
    for waker in batch {
        waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    #[derive(Default)]
    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_refresh_and_take() {
        let counter = Arc::new(CountingWaker::default());
        let waker = Waker::from(Arc::clone(&counter));
        let mut queue = WaitQueue::new();
        let mut key = None;

        queue.register(&mut key, &waker);
        queue.register(&mut key, &waker);
        assert_eq!(queue.len(), 1);

        wake_all(queue.take_all());
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);

        // Slot stays reserved after waking; a second take finds nothing.
        assert_eq!(queue.len(), 1);
        assert!(queue.take_all().is_empty());

        queue.deregister(&mut key);
        assert!(key.is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn stale_key_never_aliases_new_waiter() {
        let first = Arc::new(CountingWaker::default());
        let second = Arc::new(CountingWaker::default());
        let mut queue = WaitQueue::new();
        let mut key_a = None;
        let mut key_b = None;

        queue.register(&mut key_a, &Waker::from(Arc::clone(&first)));
        let _ = queue.take_all();
        queue.register(&mut key_b, &Waker::from(Arc::clone(&second)));
        assert_ne!(key_a, key_b);

        queue.deregister(&mut key_a);
        wake_all(queue.take_all());
        assert_eq!(first.wakes.load(Ordering::SeqCst), 0);
        assert_eq!(second.wakes.load(Ordering::SeqCst), 1);
    }
}
