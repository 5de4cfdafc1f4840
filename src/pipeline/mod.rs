//! End-to-end pipelines composed from stages.
//!
//! A [`PipelineBuilder`] chains [`Stage`]s and fan-out groups into a single
//! flow. [`build`](PipelineBuilder::build) produces an idle [`Pipeline`];
//! [`start`](Pipeline::start) submits the inputs and spawns every task;
//! [`wait`](Pipeline::wait) collects the outcome.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──► Running ──► Completed | Cancelled | Failed
//! ```
//!
//! - `Completed`: the terminal stream closed with one result per job and no
//!   cancellation. Individual jobs may still have failed; their errors sit in
//!   their result slots.
//! - `Cancelled`: the pipeline token was cancelled or its deadline elapsed
//!   before every job produced a result.
//! - `Failed`: cancel-on-first-error was enabled and a job failed.
//!
//! # Cancellation
//!
//! The pipeline owns a root [`CancelToken`]. Each run executes under a child
//! of that token which also carries the optional deadline. Cancelling the
//! root (explicitly, through fail-fast, or by dropping a running pipeline)
//! stops every stage, pacer and source of the run. The run's token is
//! cancelled once the collector exits, whatever the outcome.
//!
//! After fail-fast fires, results still in flight are reported as
//! cancellations, never as successes.
//!
//! # Example
//!
//! ```ignore
//! let runtime = Runtime::new()?;
//! let mut pipeline = PipelineBuilder::<i64>::new()
//!     .stage(|x| Ok::<_, Error>(x * 2))
//!     .fan_out(4, |x| Ok::<_, Error>(x + 1))
//!     .build(runtime.handle());
//! pipeline.start(0..100)?;
//! let results = pipeline.await_completion()?;
//! ```

pub mod fan_in;
pub mod fan_out;
pub mod source;
pub mod stage;

pub use fan_in::fan_in;
pub use fan_out::{FanOut, fan_out};
pub use source::generate;
pub use stage::{Stage, StageStats};

use crate::cancel::{CancelGuard, CancelToken};
use crate::channel::Receiver;
use crate::combinator::pace;
use crate::config::PipelineConfig;
use crate::error::{BoxError, Error};
use crate::runtime::{Handle, JoinHandle};
use crate::stream::StreamExt;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, JobResult, Submitter};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Wires one segment of a pipeline onto a running input stream.
type Link<In, Out> = Box<
    dyn FnOnce(
            &Handle,
            &CancelToken,
            Receiver<JobResult<In>>,
            usize,
            &mut Vec<JoinHandle<StageStats>>,
        ) -> Receiver<JobResult<Out>>
        + Send,
>;

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Built, not started.
    Idle,
    /// Started; results are still being collected.
    Running,
    /// Every job produced a result.
    Completed,
    /// Cancelled or timed out before completion.
    Cancelled,
    /// Stopped by cancel-on-first-error.
    Failed,
}

impl PipelineState {
    /// Lowercase name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Completed`, `Cancelled` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for a [`Pipeline`] taking `T` and producing `U`.
pub struct PipelineBuilder<T, U = T> {
    link: Link<T, U>,
    segments: usize,
    buffer: usize,
    workers: usize,
    pace: Option<Duration>,
    timeout: Option<Duration>,
    cancel_on_first_error: bool,
}

impl<T, U> fmt::Debug for PipelineBuilder<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("segments", &self.segments)
            .field("buffer", &self.buffer)
            .field("workers", &self.workers)
            .field("pace", &self.pace)
            .field("timeout", &self.timeout)
            .field("cancel_on_first_error", &self.cancel_on_first_error)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PipelineBuilder<T, T> {
    /// Starts an empty pipeline that passes its inputs through unchanged.
    #[must_use]
    pub fn new() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            link: Box::new(|_, _, input, _, _| input),
            segments: 0,
            buffer: defaults.buffer,
            workers: defaults.workers,
            pace: defaults.rate_interval(),
            timeout: defaults.timeout(),
            cancel_on_first_error: defaults.cancel_on_first_error,
        }
    }
}

impl<T: Send + 'static> Default for PipelineBuilder<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U> PipelineBuilder<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Appends a single-task stage applying `work`.
    #[must_use]
    pub fn stage<V, E, F>(self, work: F) -> PipelineBuilder<T, V>
    where
        V: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(U) -> Result<V, E> + Send + Sync + 'static,
    {
        let stage = Stage::new(work).named(format!("stage-{}", self.segments));
        self.then(move |handle, token, input, capacity, joins| {
            let (output, join) = stage.spawn(handle, token, input, capacity);
            joins.push(join);
            output
        })
    }

    /// Appends `workers` parallel copies of a stage applying `work`, merged
    /// back into one stream.
    ///
    /// Results leave the group in completion order; the final result set is
    /// still sorted by job index.
    #[must_use]
    pub fn fan_out<V, E, F>(self, workers: usize, work: F) -> PipelineBuilder<T, V>
    where
        V: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(U) -> Result<V, E> + Send + Sync + 'static,
    {
        let stage = Stage::new(work).named(format!("fan-out-{}", self.segments));
        self.then(move |handle, token, input, capacity, joins| {
            let group = fan_out(handle, token, input, workers, &stage, capacity);
            joins.extend(group.workers);
            fan_in(handle, token, group.outputs, capacity)
        })
    }

    /// Appends a fan-out using the builder's configured worker count.
    #[must_use]
    pub fn parallel<V, E, F>(self, work: F) -> PipelineBuilder<T, V>
    where
        V: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(U) -> Result<V, E> + Send + Sync + 'static,
    {
        let workers = self.workers;
        self.fan_out(workers, work)
    }

    /// Limits the source to one job per `interval`.
    #[must_use]
    pub fn pace(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Sets the capacity of every channel in the pipeline.
    #[must_use]
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity;
        self
    }

    /// Sets the worker count used by [`parallel`](Self::parallel).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Gives each run a deadline, measured from [`Pipeline::start`].
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancels the run as soon as any job fails.
    #[must_use]
    pub fn cancel_on_first_error(mut self, enabled: bool) -> Self {
        self.cancel_on_first_error = enabled;
        self
    }

    /// Applies buffer, worker, pacing, deadline and fail-fast settings.
    ///
    /// Only affects segments appended afterwards where the worker count is
    /// concerned.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.buffer = config.buffer;
        self.workers = config.workers;
        self.pace = config.rate_interval();
        self.timeout = config.timeout();
        self.cancel_on_first_error = config.cancel_on_first_error;
        self
    }

    /// Finalizes the pipeline. Nothing runs until [`Pipeline::start`].
    #[must_use]
    pub fn build(self, handle: &Handle) -> Pipeline<T, U> {
        Pipeline {
            handle: handle.clone(),
            link: Some(self.link),
            buffer: self.buffer,
            pace: self.pace,
            timeout: self.timeout,
            cancel_on_first_error: self.cancel_on_first_error,
            token: CancelToken::new(),
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            submitter: Submitter::new(),
            run: None,
            collector: None,
            stages: Vec::new(),
        }
    }

    fn then<V, L>(self, next: L) -> PipelineBuilder<T, V>
    where
        L: FnOnce(
                &Handle,
                &CancelToken,
                Receiver<JobResult<U>>,
                usize,
                &mut Vec<JoinHandle<StageStats>>,
            ) -> Receiver<JobResult<V>>
            + Send
            + 'static,
    {
        let previous = self.link;
        PipelineBuilder {
            link: Box::new(move |handle, token, input, capacity, joins| {
                let middle = previous(handle, token, input, capacity, joins);
                next(handle, token, middle, capacity, joins)
            }),
            segments: self.segments + 1,
            buffer: self.buffer,
            workers: self.workers,
            pace: self.pace,
            timeout: self.timeout,
            cancel_on_first_error: self.cancel_on_first_error,
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug)]
pub struct RunReport<U> {
    /// Terminal state.
    pub state: PipelineState,
    /// Every result that reached the end of the pipeline, sorted by index.
    pub results: Vec<JobResult<U>>,
    /// First work-function failure seen, if any.
    pub first_error: Option<Error>,
    /// Why the run's token finished, if it did.
    pub reason: Option<CancelReason>,
    /// Counters of every stage worker, in build order.
    pub stages: Vec<StageStats>,
    /// Number of jobs submitted.
    pub submitted: usize,
}

impl<U> RunReport<U> {
    /// Returns the complete result set, or the single terminal error.
    ///
    /// `Cancelled` maps to [`Error::Cancelled`] or
    /// [`Error::DeadlineExceeded`]; `Failed` maps to the first
    /// [`WorkerError`](crate::WorkerError).
    pub fn into_result(self) -> Result<Vec<JobResult<U>>, Error> {
        match self.state {
            PipelineState::Completed => Ok(self.results),
            PipelineState::Failed => Err(self
                .first_error
                .unwrap_or_else(|| Error::Cancelled(CancelReason::fail_fast()))),
            PipelineState::Cancelled => Err(self
                .reason
                .map_or_else(|| Error::Cancelled(CancelReason::shutdown()), CancelReason::into_error)),
            state @ (PipelineState::Idle | PipelineState::Running) => Err(Error::InvalidState {
                expected: "finished",
                actual: state.as_str(),
            }),
        }
    }
}

struct Collected<U> {
    state: PipelineState,
    results: Vec<JobResult<U>>,
    first_error: Option<Error>,
    reason: Option<CancelReason>,
}

/// A built pipeline. Runs once.
pub struct Pipeline<T, U> {
    handle: Handle,
    link: Option<Link<T, U>>,
    buffer: usize,
    pace: Option<Duration>,
    timeout: Option<Duration>,
    cancel_on_first_error: bool,
    token: CancelToken,
    state: Arc<Mutex<PipelineState>>,
    submitter: Submitter,
    run: Option<CancelToken>,
    collector: Option<JoinHandle<Collected<U>>>,
    stages: Vec<JoinHandle<StageStats>>,
}

impl<T, U> fmt::Debug for Pipeline<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &*self.state.lock())
            .field("submitted", &self.submitter.submitted())
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

impl<T, U> Pipeline<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Submits `inputs` and starts every stage.
    ///
    /// Fails with [`Error::InvalidState`] unless the pipeline is idle.
    pub fn start(&mut self, inputs: impl IntoIterator<Item = T>) -> Result<(), Error> {
        let state = self.state();
        let link = match self.link.take() {
            Some(link) if state == PipelineState::Idle => link,
            link => {
                self.link = link;
                return Err(Error::InvalidState {
                    expected: "idle",
                    actual: state.as_str(),
                });
            }
        };

        let scope = self
            .timeout
            .map_or_else(|| self.token.child(), |timeout| self.token.child_with_timeout(timeout));
        self.run = Some(scope.clone());
        let jobs: Vec<JobResult<T>> = inputs
            .into_iter()
            .map(|payload| JobResult::from(self.submitter.submit(payload)))
            .collect();
        let expected = jobs.len();

        let mut source = generate(&self.handle, &scope, jobs, self.buffer);
        if let Some(interval) = self.pace {
            source = pace(&self.handle, &scope, source, interval, self.buffer);
        }
        let output = link(&self.handle, &scope, source, self.buffer, &mut self.stages);

        *self.state.lock() = PipelineState::Running;
        debug!(
            jobs = expected,
            stages = self.stages.len(),
            timeout = ?self.timeout,
            fail_fast = self.cancel_on_first_error,
            "pipeline started"
        );
        self.collector = Some(self.handle.spawn(collect(
            output,
            expected,
            scope.into_guard(),
            self.token.clone(),
            self.cancel_on_first_error,
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    /// Blocks until the run finishes and returns its report.
    ///
    /// Fails with [`Error::InvalidState`] if the pipeline was never started
    /// or was already waited on.
    pub fn wait(&mut self) -> Result<RunReport<U>, Error> {
        let Some(collector) = self.collector.take() else {
            return Err(Error::InvalidState {
                expected: "running",
                actual: self.state().as_str(),
            });
        };
        let collected = collector.join()?;
        let stages = self
            .stages
            .drain(..)
            .map(JoinHandle::join)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunReport {
            state: collected.state,
            results: collected.results,
            first_error: collected.first_error,
            reason: collected.reason,
            stages,
            submitted: self.submitter.submitted(),
        })
    }

    /// Blocks until the run finishes; returns every result sorted by index,
    /// or the single terminal error.
    pub fn await_completion(&mut self) -> Result<Vec<JobResult<U>>, Error> {
        self.wait()?.into_result()
    }
}

impl<T, U> Pipeline<T, U> {
    /// Cancels the pipeline. Idempotent; cancelling before `start` makes the
    /// run finish immediately as `Cancelled`.
    pub fn cancel(&self, reason: CancelReason) {
        if self.token.cancel_with(reason) {
            debug!(state = %self.state(), "pipeline cancelled");
        }
    }

    /// The pipeline's root token.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The token of the started run, a child of [`token`](Self::token)
    /// carrying the run's deadline. `None` before `start`.
    #[must_use]
    pub fn run_token(&self) -> Option<&CancelToken> {
        self.run.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }
}

impl<T, U> Drop for Pipeline<T, U> {
    fn drop(&mut self) {
        if self.state() == PipelineState::Running {
            self.token.cancel_with(CancelReason::user("pipeline dropped"));
        }
    }
}

async fn collect<U>(
    mut output: Receiver<JobResult<U>>,
    expected: usize,
    scope: CancelGuard,
    root: CancelToken,
    cancel_on_first_error: bool,
    state: Arc<Mutex<PipelineState>>,
) -> Collected<U> {
    let mut results = Vec::with_capacity(expected);
    let mut first_error = None;
    let mut failed = false;
    let mut cancelled_items = 0_usize;
    while let Some(mut result) = output.next().await {
        if failed && result.is_ok() {
            trace!(index = result.index, "success after fail-fast reported as cancelled");
            result = JobResult::err(result.index, Error::Cancelled(CancelReason::fail_fast()));
        }
        if let Err(err) = &result.outcome {
            if err.is_cancellation() {
                cancelled_items += 1;
            } else if first_error.is_none() {
                debug!(index = result.index, error = %err, "first job failure");
                first_error = Some(err.clone());
                if cancel_on_first_error && !scope.is_done() {
                    failed = root.cancel_with(CancelReason::fail_fast());
                }
            }
        }
        results.push(result);
    }
    results.sort_by_key(|result| result.index);

    let terminal = if failed {
        PipelineState::Failed
    } else if results.len() == expected && cancelled_items == 0 {
        PipelineState::Completed
    } else {
        PipelineState::Cancelled
    };
    *state.lock() = terminal;
    debug!(
        state = %terminal,
        results = results.len(),
        expected,
        "pipeline finished"
    );
    Collected {
        state: terminal,
        results,
        first_error,
        reason: scope.reason(),
    }
}
