//! Minimum-interval pacing.
//!
//! A [`RateLimiter`] hands out emission slots spaced at least `interval`
//! apart. The first slot is immediate. Waiting for a slot races the
//! caller's token, so a cancelled pacer stops without emitting a
//! straggler.
//!
//! [`pace`] applies a limiter to a stream: it spawns a task that forwards
//! items from an input channel to a new output channel, at most one per
//! interval.

use crate::cancel::CancelToken;
use crate::channel::{Receiver, channel};
use crate::error::Error;
use crate::runtime::Handle;
use crate::time::sleep_until;
use crate::tracing_compat::{debug, trace};
use std::time::{Duration, Instant};

/// Spaces emissions at least `interval` apart.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter whose first slot is available immediately.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    /// The minimum spacing between slots.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next slot opens.
    #[must_use]
    pub fn next_slot(&self) -> Instant {
        self.next_slot.unwrap_or_else(Instant::now)
    }

    /// Takes the next slot if it is already open.
    pub fn try_ready(&mut self) -> bool {
        let now = Instant::now();
        if self.next_slot.is_some_and(|slot| slot > now) {
            return false;
        }
        self.record_emission(now);
        true
    }

    /// Waits for the next slot, failing with the token's error if it
    /// finishes first.
    pub async fn until_ready(&mut self, token: &CancelToken) -> Result<(), Error> {
        if let Some(slot) = self.next_slot {
            if slot > Instant::now() {
                token
                    .or_cancel(sleep_until(slot))
                    .await
                    .map_err(|reason| reason.into_error())?;
            }
        }
        token.checkpoint()?;
        self.record_emission(Instant::now());
        Ok(())
    }

    /// Like [`until_ready`](Self::until_ready), but fails immediately with
    /// [`Error::Timeout`] if the next slot lies more than `window` away.
    pub async fn until_ready_within(
        &mut self,
        token: &CancelToken,
        window: Duration,
    ) -> Result<(), Error> {
        let wait = self.next_slot().saturating_duration_since(Instant::now());
        if wait > window {
            return Err(Error::Timeout(window));
        }
        self.until_ready(token).await
    }

    /// Starts the next interval from `at`. Pacers call this after a slow
    /// downstream send so the spacing is measured from the actual emission.
    pub fn record_emission(&mut self, at: Instant) {
        let next = at.checked_add(self.interval).unwrap_or(at);
        self.next_slot = Some(self.next_slot.map_or(next, |slot| slot.max(next)));
    }
}

/// Forwards `input` to a new channel of `capacity`, at most one item per
/// `interval`.
///
/// The output closes once `input` is exhausted or `token` finishes. After
/// cancellation nothing more is emitted, even if an item was already
/// taken from `input`.
#[must_use]
pub fn pace<T: Send + 'static>(
    handle: &Handle,
    token: &CancelToken,
    input: Receiver<T>,
    interval: Duration,
    capacity: usize,
) -> Receiver<T> {
    let (tx, output) = channel(capacity);
    let token = token.clone();
    let _detached = handle.spawn(async move {
        let mut limiter = RateLimiter::new(interval);
        let mut emitted = 0_usize;
        while let Ok(item) = input.recv(&token).await {
            if limiter.until_ready(&token).await.is_err() {
                break;
            }
            if tx.send(&token, item).await.is_err() {
                break;
            }
            limiter.record_emission(Instant::now());
            emitted += 1;
            trace!(emitted, "paced item emitted");
        }
        debug!(emitted, cancelled = token.is_done(), "pacer finished");
    });
    output
}
