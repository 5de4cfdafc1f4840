//! Cancellation tokens.
//!
//! Every long-running component of the engine is handed a [`CancelToken`]
//! and races each of its suspension points against it. A pipeline owns a
//! root token; stages and workers observe it (or a child of it), so
//! cancelling the root stops the whole tree while cancelling a child leaves
//! its parent and siblings running.
//!
//! ```ignore
//! use pipewright::cancel::CancelToken;
//! use std::time::Duration;
//!
//! let root = CancelToken::new();
//! let step = root.child_with_timeout(Duration::from_millis(50));
//! let reason = step.wait();
//! assert!(reason.is_deadline());
//! assert!(!root.is_done());
//! ```

mod token;

pub use token::{CancelGuard, CancelToken, Cancelled, OrCancel};
pub use crate::types::{CancelKind, CancelReason};
