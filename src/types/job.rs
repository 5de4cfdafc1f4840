//! Jobs, results, and index assignment.
//!
//! A [`Job`] is a payload tagged with the index it was submitted under. The
//! index is immutable and is the only key used to reassemble results, so a
//! [`JobResult`] always carries the index of the job that produced it.

use crate::error::{BoxError, Error, WorkPanicked, WorkerError, panic_message};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unit of work tagged with its submission index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<T> {
    /// Submission index; immutable once assigned.
    pub index: usize,
    /// The value handed to the work function.
    pub payload: T,
}

impl<T> Job<T> {
    /// Creates a job with an explicit index.
    #[must_use]
    pub const fn new(index: usize, payload: T) -> Self {
        Self { index, payload }
    }

    /// Builds jobs for `payloads`, indexed from zero in iteration order.
    pub fn batch(payloads: impl IntoIterator<Item = T>) -> Vec<Self> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Self { index, payload })
            .collect()
    }

    /// Runs `work` on the payload and tags the outcome with this job's index.
    ///
    /// A failure becomes [`Error::Worker`]; so does a panic inside `work`,
    /// with a [`WorkPanicked`] cause.
    pub fn process<U, E, F>(self, work: &F) -> JobResult<U>
    where
        F: Fn(T) -> Result<U, E> + ?Sized,
        E: Into<BoxError>,
    {
        let index = self.index;
        match catch_unwind(AssertUnwindSafe(|| work(self.payload))) {
            Ok(Ok(value)) => JobResult::ok(index, value),
            Ok(Err(cause)) => JobResult::worker_failure(index, cause),
            Err(payload) => {
                JobResult::worker_failure(index, WorkPanicked(panic_message(&*payload)))
            }
        }
    }
}

/// The outcome of one job.
///
/// Exactly one `JobResult` is produced per admitted job, including failures,
/// which populate the error side instead of unwinding.
#[derive(Debug, Clone)]
pub struct JobResult<U> {
    /// Index of the job that produced this result.
    pub index: usize,
    /// The produced value, or the failure.
    pub outcome: Result<U, Error>,
}

impl<U> JobResult<U> {
    /// Creates a successful result.
    #[must_use]
    pub const fn ok(index: usize, value: U) -> Self {
        Self {
            index,
            outcome: Ok(value),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub const fn err(index: usize, error: Error) -> Self {
        Self {
            index,
            outcome: Err(error),
        }
    }

    /// Wraps a work-function failure for the job at `index`.
    pub fn worker_failure(index: usize, cause: impl Into<BoxError>) -> Self {
        Self::err(index, Error::Worker(WorkerError::new(index, cause)))
    }

    /// Returns true if the job succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns true if the job failed or was cancelled.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.outcome.is_err()
    }

    /// The produced value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&U> {
        self.outcome.as_ref().ok()
    }

    /// The failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    /// Consumes the result, returning the outcome.
    pub fn into_outcome(self) -> Result<U, Error> {
        self.outcome
    }

    /// Maps the value, keeping index and error untouched.
    pub fn map<V>(self, f: impl FnOnce(U) -> V) -> JobResult<V> {
        JobResult {
            index: self.index,
            outcome: self.outcome.map(f),
        }
    }
}

impl<T> From<Job<T>> for JobResult<T> {
    fn from(job: Job<T>) -> Self {
        Self::ok(job.index, job.payload)
    }
}

/// Assigns monotonically increasing indices to submitted payloads.
///
/// Indices start at zero. A submitter can be shared between threads; each
/// call to [`submit`](Self::submit) receives a distinct index.
#[derive(Debug, Default)]
pub struct Submitter {
    next: AtomicUsize,
}

impl Submitter {
    /// Creates a submitter starting at index zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    /// Wraps `payload` in a job carrying the next index.
    pub fn submit<T>(&self, payload: T) -> Job<T> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Job { index, payload }
    }

    /// Number of jobs submitted so far.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn submitter_assigns_sequential_indices() {
        let submitter = Submitter::new();
        let a = submitter.submit("a");
        let b = submitter.submit("b");
        let c = submitter.submit("c");
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert_eq!(submitter.submitted(), 3);
    }

    #[test]
    fn submitter_indices_unique_across_threads() {
        let submitter = Arc::new(Submitter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let submitter = Arc::clone(&submitter);
                std::thread::spawn(move || {
                    (0..250).map(|i| submitter.submit(i).index).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("submit thread"))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn batch_indexes_in_order() {
        let jobs = Job::batch([10, 20, 30]);
        assert_eq!(jobs, vec![Job::new(0, 10), Job::new(1, 20), Job::new(2, 30)]);
    }

    #[test]
    fn worker_failure_wraps_index() {
        let result: JobResult<i32> = JobResult::worker_failure(4, "negative payload");
        assert!(result.is_err());
        let err = result.error().expect("error");
        assert_eq!(err.kind(), ErrorKind::Worker);
        assert_eq!(err.as_worker().map(WorkerError::index), Some(4));
    }

    #[test]
    fn map_preserves_index_and_error() {
        let ok = JobResult::ok(2, 3).map(|v| v * 10);
        assert_eq!(ok.index, 2);
        assert_eq!(ok.value(), Some(&30));

        let failed: JobResult<i32> = JobResult::err(5, Error::ChannelClosed);
        let mapped = failed.map(|v| v + 1);
        assert_eq!(mapped.index, 5);
        assert_eq!(mapped.error().map(Error::kind), Some(ErrorKind::ChannelClosed));
    }

    #[test]
    fn process_reports_failures_and_panics_as_worker_errors() {
        let square = |x: i64| -> Result<i64, String> {
            if x < 0 {
                return Err(format!("negative payload {x}"));
            }
            assert!(x != 13, "unlucky payload");
            Ok(x * x)
        };
        assert_eq!(Job::new(0, 4).process(&square).value(), Some(&16));

        let failed = Job::new(1, -2).process(&square);
        let worker = failed.error().and_then(Error::as_worker).expect("worker error");
        assert_eq!(worker.index(), 1);
        assert_eq!(worker.cause().to_string(), "negative payload -2");

        let panicked = Job::new(2, 13).process(&square);
        let worker = panicked.error().and_then(Error::as_worker).expect("worker error");
        assert_eq!(worker.index(), 2);
        assert!(worker.cause().to_string().contains("unlucky payload"));
    }
}
