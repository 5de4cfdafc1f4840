//! Pipewright: a bounded, cancel-correct concurrent pipeline engine.
//!
//! # Overview
//!
//! Pipewright decomposes a stream of work items into staged, parallelizable
//! processing with explicit limits on concurrency, deterministic result
//! ordering, hierarchical cancellation, rate pacing, and asynchronous result
//! handoff. Work functions are plain synchronous closures; the engine owns
//! scheduling, backpressure, and shutdown.
//!
//! # Core Guarantees
//!
//! - **Bounded**: every channel has a fixed capacity and every executor a
//!   fixed concurrency limit
//! - **Ordered**: results are reassembled by submission index, whatever order
//!   workers finish in
//! - **One result per job**: failures and panics become error results in the
//!   failing job's slot instead of unwinding the run
//! - **Cancel-correct**: every suspension point races the governing token;
//!   cancelling a token cancels all of its descendants
//! - **No leaked tasks**: runtime shutdown drops every parked task, and
//!   [`Runtime::live_tasks`] exposes the count for leak checks
//!
//! # Module Structure
//!
//! - [`types`]: Jobs, results, submission indices, cancellation reasons
//! - [`error`](mod@error): Error taxonomy
//! - [`cancel`]: Hierarchical cancellation tokens with deadlines
//! - [`runtime`]: Worker-pool task runtime, `block_on`, timer heap
//! - [`time`]: Sleep and timeout primitives
//! - [`sync`]: Promise, semaphore, wait group
//! - [`channel`]: Bounded cancel-aware MPMC channels
//! - [`stream`]: Pull-based streams and merge
//! - [`combinator`]: Bounded parallel executor and rate limiter
//! - [`pipeline`]: Stages, fan-out/fan-in, end-to-end pipelines
//! - [`config`]: Serde-backed runtime and pipeline configuration
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```ignore
//! use pipewright::{Error, run_bounded, Job};
//!
//! let jobs = Job::batch(0..100_u64);
//! let results = run_bounded(jobs, 4, |x| Ok::<_, Error>(x * x))?;
//! assert_eq!(results[7].value(), Some(&49));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod cancel;
pub mod channel;
pub mod combinator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use cancel::{CancelGuard, CancelToken};
pub use combinator::{RateLimiter, pace, run_bounded, run_bounded_async};
pub use config::{Config, ConfigError, PipelineConfig, RuntimeConfig};
pub use error::{BoxError, Error, ErrorKind, Result, WorkPanicked, WorkerError};
pub use pipeline::{
    FanOut, Pipeline, PipelineBuilder, PipelineState, RunReport, Stage, StageStats, fan_in,
    fan_out, generate,
};
pub use runtime::{Handle, JoinHandle, Runtime, RuntimeBuilder, block_on};
pub use sync::{Promise, Semaphore, WaitGroup};
pub use types::{CancelKind, CancelReason, Job, JobResult, Submitter};
