//! Core types for the pipeline engine.
//!
//! - [`cancel`]: Cancellation reason and kind types
//! - [`job`]: Jobs, results, and submission indices

pub mod cancel;
pub mod job;

pub use cancel::{CancelKind, CancelReason};
pub use job::{Job, JobResult, Submitter};
