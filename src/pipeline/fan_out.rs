//! Parallel copies of one stage sharing an input.

use super::stage::{Stage, StageStats};
use crate::cancel::CancelToken;
use crate::channel::Receiver;
use crate::runtime::{Handle, JoinHandle};
use crate::tracing_compat::debug;
use crate::types::JobResult;

/// The running workers of a fan-out.
#[derive(Debug)]
pub struct FanOut<U> {
    /// One output channel per worker.
    pub outputs: Vec<Receiver<JobResult<U>>>,
    /// One handle per worker, resolving to its counters.
    pub workers: Vec<JoinHandle<StageStats>>,
}

impl<U> FanOut<U> {
    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always false; a fan-out has at least one worker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Starts `workers` copies of `stage`, all receiving from `input`.
///
/// Each item is taken by exactly one worker. Nothing orders results across
/// workers. A worker count of zero is treated as one.
pub fn fan_out<T, U, I>(
    handle: &Handle,
    token: &CancelToken,
    input: Receiver<I>,
    workers: usize,
    stage: &Stage<T, U>,
    capacity: usize,
) -> FanOut<U>
where
    T: Send + 'static,
    U: Send + 'static,
    I: Into<JobResult<T>> + Send + 'static,
{
    let workers = workers.max(1);
    let (outputs, handles) = (0..workers)
        .map(|worker| {
            let copy = stage.clone().named(format!("{}#{worker}", stage.name()));
            copy.spawn(handle, token, input.clone(), capacity)
        })
        .unzip();
    debug!(stage = %stage.name(), workers, "fan-out started");
    FanOut {
        outputs,
        workers: handles,
    }
}
