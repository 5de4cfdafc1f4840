//! Error types for the pipeline engine.
//!
//! Per-item failures are values, not unwinds: a failing work function
//! produces a [`JobResult`](crate::JobResult) carrying [`Error::Worker`].
//! Token-level failures ([`Error::Cancelled`], [`Error::DeadlineExceeded`])
//! surface as the terminal state of whatever scope the token governs.

use crate::types::CancelReason;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Boxed error type accepted from work functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Discriminant of an [`Error`], convenient for matching and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A work function failed (or panicked) while processing a job.
    Worker,
    /// The governing token was explicitly cancelled.
    Cancelled,
    /// The governing token's deadline elapsed before completion.
    DeadlineExceeded,
    /// A local wait window (promise `get_timeout`, rate limiter) elapsed.
    Timeout,
    /// Send or receive on a stream that was already closed.
    ChannelClosed,
    /// A spawned task panicked.
    Panicked,
    /// An operation was invoked in the wrong lifecycle state.
    InvalidState,
    /// Invalid configuration.
    Config,
    /// The runtime could not start a worker thread.
    Spawn,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Worker => "worker",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Timeout => "timeout",
            Self::ChannelClosed => "channel closed",
            Self::Panicked => "panicked",
            Self::InvalidState => "invalid state",
            Self::Config => "config",
            Self::Spawn => "spawn",
        };
        f.write_str(name)
    }
}

/// Failure raised by a work function invocation.
///
/// Carries the index of the job that failed and the underlying cause. The
/// cause is reference-counted so results can be cloned and observed by
/// several consumers.
#[derive(Debug, Clone)]
pub struct WorkerError {
    index: usize,
    cause: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl WorkerError {
    /// Creates a worker error for the job at `index`.
    pub fn new(index: usize, cause: impl Into<BoxError>) -> Self {
        Self {
            index,
            cause: Arc::from(cause.into()),
        }
    }

    /// Index of the job whose work function failed.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The underlying failure.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.cause
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} failed: {}", self.index, self.cause)
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// The engine's error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A work function failed for one job.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// The governing token was cancelled.
    #[error("cancelled ({0})")]
    Cancelled(CancelReason),
    /// The governing token's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A local wait window elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Send or receive on a closed stream.
    #[error("channel closed")]
    ChannelClosed,
    /// A spawned task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// An operation was invoked in the wrong lifecycle state.
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the object was actually in.
        actual: &'static str,
    },
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The runtime could not start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl Error {
    /// Returns the discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Worker(_) => ErrorKind::Worker,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Panicked(_) => ErrorKind::Panicked,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Config(_) => ErrorKind::Config,
            Self::Spawn(_) => ErrorKind::Spawn,
        }
    }

    /// Returns true for token-level outcomes (`Cancelled`, `DeadlineExceeded`).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::DeadlineExceeded)
    }

    /// Returns the worker error, if this is one.
    #[must_use]
    pub fn as_worker(&self) -> Option<&WorkerError> {
        match self {
            Self::Worker(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self::Panicked(panic_message(payload))
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Error carrying a panic raised inside a work function.
#[derive(Debug, Clone, thiserror::Error)]
#[error("work function panicked: {0}")]
pub struct WorkPanicked(pub String);
