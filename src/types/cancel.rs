//! Cancellation reason and kind types.
//!
//! Cancellation is a first-class signal, not a silent drop. This module
//! defines the types that describe why a token became done. A token records
//! exactly one reason: whichever transition happens first.

use core::fmt;

/// The kind of cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// The token (or an ancestor) passed its deadline.
    Timeout,
    /// Cancellation due to fail-fast policy (a sibling job failed).
    FailFast,
    /// Cancellation due to runtime shutdown.
    Shutdown,
}

impl CancelKind {
    /// Returns true if this kind represents an elapsed deadline.
    #[must_use]
    pub const fn is_deadline(self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "deadline exceeded"),
            Self::FailFast => write!(f, "fail-fast"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason for a cancellation, including kind and optional context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a deadline cancellation reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Creates a fail-fast cancellation reason (a sibling job failed).
    #[must_use]
    pub const fn fail_fast() -> Self {
        Self::new(CancelKind::FailFast)
    }

    /// Creates a shutdown cancellation reason.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Attaches a message to this reason.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns true if this reason is an elapsed deadline.
    #[must_use]
    pub const fn is_deadline(&self) -> bool {
        self.kind.is_deadline()
    }

    /// Returns true if this reason indicates runtime shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }

    /// Converts this reason into the matching terminal error.
    ///
    /// Deadlines map to [`Error::DeadlineExceeded`](crate::Error::DeadlineExceeded);
    /// every other kind maps to [`Error::Cancelled`](crate::Error::Cancelled).
    #[must_use]
    pub fn into_error(self) -> crate::Error {
        if self.is_deadline() {
            crate::Error::DeadlineExceeded
        } else {
            crate::Error::Cancelled(self)
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl From<CancelReason> for crate::Error {
    fn from(reason: CancelReason) -> Self {
        reason.into_error()
    }
}
