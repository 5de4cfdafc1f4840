//! Merging several streams into one.

use crate::cancel::CancelToken;
use crate::channel::{Receiver, channel};
use crate::runtime::{Budget, Handle};
use crate::stream::{StreamExt, merge};
use crate::tracing_compat::debug;

/// Forwards items from every input to a new channel of `capacity`, in the
/// order they become available.
///
/// The output closes once *all* inputs have closed, or when `token`
/// finishes. No ordering is preserved across inputs.
#[must_use]
pub fn fan_in<T: Send + 'static>(
    handle: &Handle,
    token: &CancelToken,
    inputs: Vec<Receiver<T>>,
    capacity: usize,
) -> Receiver<T> {
    let (tx, output) = channel(capacity);
    let token = token.clone();
    let _detached = handle.spawn(async move {
        let mut merged = merge(inputs);
        let mut forwarded = 0_usize;
        let mut budget = Budget::default();
        while let Ok(Some(item)) = token.or_cancel(merged.next()).await {
            if tx.send(&token, item).await.is_err() {
                break;
            }
            forwarded += 1;
            budget.spend().await;
        }
        debug!(
            forwarded,
            open_inputs = merged.len(),
            cancelled = token.is_done(),
            "fan-in finished"
        );
    });
    output
}
