//! Sleep futures backed by the timer driver.

use super::driver;
use crate::runtime::timer::TimerKey;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Far-future fallback when `now + duration` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Future that completes once its deadline has passed.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    registered: Option<(Waker, TimerKey)>,
}

impl Sleep {
    /// Returns the deadline this sleep waits for.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Moves the deadline; the next poll re-registers with the driver.
    pub fn reset(&mut self, deadline: Instant) {
        self.deadline = deadline;
        self.withdraw();
    }

    fn withdraw(&mut self) {
        if let Some((_, key)) = self.registered.take() {
            driver::global().cancel(key);
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.withdraw();
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_elapsed() {
            self.withdraw();
            return Poll::Ready(());
        }
        let stale = self
            .registered
            .as_ref()
            .is_none_or(|(waker, _)| !waker.will_wake(cx.waker()));
        if stale {
            self.withdraw();
            let key = driver::global().register(self.deadline, cx.waker().clone());
            self.registered = Some((cx.waker().clone(), key));
        }
        Poll::Pending
    }
}

/// Sleeps until `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        registered: None,
    }
}

/// Sleeps for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    let now = Instant::now();
    let deadline = now
        .checked_add(duration)
        .unwrap_or_else(|| now + FAR_FUTURE);
    sleep_until(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;

    #[test]
    fn sleep_waits_at_least_duration() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("sleep_waits_at_least_duration");
        let start = Instant::now();
        block_on(sleep(Duration::from_millis(40)));
        let elapsed = start.elapsed();
        crate::assert_with_log!(
            elapsed >= Duration::from_millis(40),
            "slept long enough",
            ">= 40ms",
            elapsed
        );
        crate::test_complete!("sleep_waits_at_least_duration");
    }

    #[test]
    fn elapsed_sleep_is_immediately_ready() {
        let past = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        let sleep = sleep_until(past);
        assert!(sleep.is_elapsed());
        block_on(sleep);
    }

    #[test]
    fn reset_moves_deadline() {
        let mut sleep = sleep(Duration::from_secs(3600));
        assert!(!sleep.is_elapsed());
        let now = Instant::now();
        sleep.reset(now);
        assert_eq!(sleep.deadline(), now);
        block_on(sleep);
    }
}
