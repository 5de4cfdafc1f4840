//! Feeding a channel from an iterator.

use crate::cancel::CancelToken;
use crate::channel::{Receiver, channel};
use crate::runtime::{Budget, Handle};
use crate::tracing_compat::debug;

/// Spawns a task that sends every item of `items` into a new channel of
/// `capacity`, then closes it.
///
/// Sending respects backpressure and stops early when `token` finishes.
#[must_use]
pub fn generate<I>(
    handle: &Handle,
    token: &CancelToken,
    items: I,
    capacity: usize,
) -> Receiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, output) = channel(capacity);
    let token = token.clone();
    let items = items.into_iter();
    let _detached = handle.spawn(async move {
        let mut sent = 0_usize;
        let mut budget = Budget::default();
        for item in items {
            if tx.send(&token, item).await.is_err() {
                break;
            }
            sent += 1;
            budget.spend().await;
        }
        debug!(sent, cancelled = token.is_done(), "source finished");
    });
    output
}
