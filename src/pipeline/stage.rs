//! A single processing step.
//!
//! A running stage is one task: it pulls items from its input channel,
//! applies the work function and sends one result per item downstream.
//! Items that already carry an error (from an earlier stage) are forwarded
//! untouched. The output channel belongs to the stage alone and closes
//! when the task ends: after the input is exhausted, or after cancellation
//! once the in-flight item has been handled.

use crate::cancel::CancelToken;
use crate::channel::{Receiver, SendError, channel};
use crate::error::BoxError;
use crate::runtime::{Budget, Handle, JoinHandle};
use crate::tracing_compat::{debug, trace};
use crate::types::{Job, JobResult};
use std::fmt;
use std::sync::Arc;

type WorkFn<T, U> = dyn Fn(T) -> Result<U, BoxError> + Send + Sync;

/// Counters reported by a stage when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Items the work function was applied to.
    pub processed: usize,
    /// Of those, items whose work function failed or panicked.
    pub failed: usize,
    /// Upstream failures passed through without calling the work function.
    pub forwarded: usize,
    /// Results discarded because the output was full at cancellation.
    pub dropped: usize,
}

/// A reusable processing step wrapping a work function.
pub struct Stage<T, U> {
    name: Arc<str>,
    work: Arc<WorkFn<T, U>>,
}

impl<T, U> Clone for Stage<T, U> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            work: Arc::clone(&self.work),
        }
    }
}

impl<T, U> fmt::Debug for Stage<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T, U> Stage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Wraps `work`. Its errors become [`WorkerError`](crate::WorkerError)
    /// results tagged with the failing job's index.
    pub fn new<E, F>(work: F) -> Self
    where
        E: Into<BoxError> + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from("stage"),
            work: Arc::new(move |payload| work(payload).map_err(Into::into)),
        }
    }

    /// Sets the name used in log events.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// The stage's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the work function to one job.
    pub fn process(&self, job: Job<T>) -> JobResult<U> {
        job.process(&*self.work)
    }

    /// Starts the stage on `handle`, reading from `input` and writing to a
    /// new channel of `capacity`.
    ///
    /// `input` may carry fresh [`Job`]s or upstream [`JobResult`]s. When
    /// `token` finishes, the stage stops pulling; the result of the item in
    /// flight is delivered only if the output has room right away.
    pub fn spawn<I>(
        &self,
        handle: &Handle,
        token: &CancelToken,
        input: Receiver<I>,
        capacity: usize,
    ) -> (Receiver<JobResult<U>>, JoinHandle<StageStats>)
    where
        I: Into<JobResult<T>> + Send + 'static,
    {
        let (tx, output) = channel(capacity);
        let stage = self.clone();
        let token = token.clone();
        let join = handle.spawn(async move {
            debug!(stage = %stage.name, "stage started");
            let mut stats = StageStats::default();
            let mut budget = Budget::default();
            while let Ok(item) = input.recv(&token).await {
                let JobResult { index, outcome } = item.into();
                let result = match outcome {
                    Ok(payload) => {
                        let result = stage.process(Job::new(index, payload));
                        stats.processed += 1;
                        if result.is_err() {
                            stats.failed += 1;
                            trace!(stage = %stage.name, index, "work function failed");
                        }
                        result
                    }
                    Err(err) => {
                        stats.forwarded += 1;
                        JobResult::err(index, err)
                    }
                };
                match tx.send(&token, result).await {
                    Ok(()) => {}
                    Err(SendError::Cancelled { value, .. }) => {
                        let index = value.index;
                        if tx.try_send(value).is_err() {
                            trace!(
                                stage = %stage.name,
                                index,
                                "in-flight result dropped at cancellation"
                            );
                            stats.dropped += 1;
                        }
                        break;
                    }
                    Err(SendError::Closed(_)) => break,
                }
                budget.spend().await;
            }
            debug!(
                stage = %stage.name,
                processed = stats.processed,
                failed = stats.failed,
                dropped = stats.dropped,
                cancelled = token.is_done(),
                "stage stopped"
            );
            stats
        });
        (output, join)
    }
}
