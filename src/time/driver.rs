//! Timer driver for sleep and deadline registration.
//!
//! A single background thread owns a [`TimerHeap`] and wakes registered
//! wakers once their deadline passes. The thread is started lazily on first
//! registration and parks on a condition variable until the earliest
//! deadline or a new, earlier registration arrives. Registrations that are
//! no longer wanted are withdrawn by key.

use crate::runtime::timer::{TimerHeap, TimerKey};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::{Once, OnceLock};
use std::task::Waker;
use std::time::Instant;

/// Shared timer state driven by the timer thread.
#[derive(Debug, Default)]
pub struct TimerDriver {
    heap: Mutex<TimerHeap>,
    signal: Condvar,
}

static DRIVER: OnceLock<TimerDriver> = OnceLock::new();
static START: Once = Once::new();

/// Returns the process-wide timer driver, starting its thread if needed.
pub fn global() -> &'static TimerDriver {
    let driver = DRIVER.get_or_init(TimerDriver::default);
    START.call_once(|| {
        std::thread::Builder::new()
            .name("pipewright-timer".into())
            .spawn(move || driver.run())
            .expect("failed to spawn timer thread");
    });
    driver
}

impl TimerDriver {
    /// Registers `waker` to be woken at or after `deadline`.
    ///
    /// The returned key withdraws the registration through
    /// [`cancel`](Self::cancel) if the wakeup is no longer wanted.
    pub fn register(&self, deadline: Instant, waker: Waker) -> TimerKey {
        let mut heap = self.heap.lock();
        let earliest = heap.peek_deadline().is_none_or(|current| deadline < current);
        let key = heap.insert(deadline, waker);
        drop(heap);
        if earliest {
            self.signal.notify_one();
        }
        key
    }

    /// Withdraws a registration. A key that already fired is ignored.
    pub fn cancel(&self, key: TimerKey) -> bool {
        // Dropped after the lock: a waker's destructor may withdraw timers.
        let waker = self.heap.lock().remove(key);
        waker.is_some()
    }

    /// Number of pending registrations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.heap.lock().len()
    }

    fn run(&self) {
        let mut heap = self.heap.lock();
        loop {
            let expired = heap.pop_expired(Instant::now());
            if !expired.is_empty() {
                MutexGuard::unlocked(&mut heap, || {
                    for waker in expired {
                        waker.wake();
                    }
                });
                continue;
            }
            match heap.peek_deadline() {
                Some(deadline) => {
                    self.signal.wait_until(&mut heap, deadline);
                }
                None => self.signal.wait(&mut heap),
            }
        }
    }
}
