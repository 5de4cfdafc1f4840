//! Bounded parallel executor.
//!
//! Runs one task per job, with at most `max_concurrency` work functions in
//! flight at once, and returns one result per job in input order.
//!
//! Each task acquires a semaphore permit (racing the token), runs the work
//! function, releases the permit and writes its result into the slot
//! reserved for its input position. A [`WaitGroup`] is the join barrier:
//! the executor returns once every task has reported. A job whose permit
//! wait is cancelled still reports, with the token's error.
//!
//! ```ignore
//! use pipewright::{Job, run_bounded};
//!
//! let jobs = Job::batch([10, 20, 30, 40, 50]);
//! let results = run_bounded(jobs, 2, |x: u64| Ok::<_, std::convert::Infallible>(x * x))?;
//! let squares: Vec<u64> = results.into_iter().map(|r| r.into_outcome().unwrap()).collect();
//! assert_eq!(squares, [100, 400, 900, 1600, 2500]);
//! ```

use crate::cancel::CancelToken;
use crate::error::{BoxError, Error};
use crate::runtime::{Handle, Runtime};
use crate::sync::{Semaphore, WaitGroup};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Job, JobResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Marks one unit of the group done on every exit path, including a task
/// dropped at runtime shutdown.
struct DoneOnDrop(WaitGroup);

impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.done();
    }
}

type Slots<U> = Arc<Mutex<Vec<Option<JobResult<U>>>>>;

/// Processes `jobs` on `handle` with at most `max_concurrency` work
/// functions running at once.
///
/// `results[i]` corresponds to `jobs[i]` whatever the completion order.
/// Fails only for `max_concurrency == 0`; per-job failures and
/// cancellations are reported in the results.
pub async fn run_bounded_async<T, U, E, F>(
    handle: &Handle,
    token: &CancelToken,
    jobs: Vec<Job<T>>,
    max_concurrency: usize,
    work: F,
) -> Result<Vec<JobResult<U>>, Error>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<BoxError> + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    if max_concurrency == 0 {
        return Err(Error::Config("max_concurrency must be at least 1".into()));
    }
    let total = jobs.len();
    let indices: Vec<usize> = jobs.iter().map(|job| job.index).collect();
    let slots: Slots<U> = Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let work = Arc::new(work);
    let group = WaitGroup::new();
    group.add(total);
    debug!(jobs = total, max_concurrency, "bounded run started");

    for (position, job) in jobs.into_iter().enumerate() {
        let done = DoneOnDrop(group.clone());
        let slots = Arc::clone(&slots);
        let semaphore = Arc::clone(&semaphore);
        let work = Arc::clone(&work);
        let token = token.clone();
        let _detached = handle.spawn(async move {
            let _done = done;
            let result = match semaphore.acquire(&token).await {
                Ok(permit) => {
                    let result = job.process(&*work);
                    drop(permit);
                    result
                }
                Err(err) => JobResult::err(job.index, err.into()),
            };
            slots.lock()[position] = Some(result);
        });
    }

    group.wait().await;

    let filled = std::mem::take(&mut *slots.lock());
    let results: Vec<JobResult<U>> = filled
        .into_iter()
        .zip(indices)
        .map(|(slot, index)| {
            slot.unwrap_or_else(|| JobResult::err(index, Error::Cancelled(CancelReason::shutdown())))
        })
        .collect();
    debug!(
        jobs = total,
        failed = results.iter().filter(|r| r.is_err()).count(),
        "bounded run finished"
    );
    Ok(results)
}

impl Runtime {
    /// Blocking form of [`run_bounded_async`] on this runtime.
    pub fn run_bounded<T, U, E, F>(
        &self,
        token: &CancelToken,
        jobs: Vec<Job<T>>,
        max_concurrency: usize,
        work: F,
    ) -> Result<Vec<JobResult<U>>, Error>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: Into<BoxError> + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.block_on(run_bounded_async(
            self.handle(),
            token,
            jobs,
            max_concurrency,
            work,
        ))
    }
}

/// Processes `jobs` with at most `max_concurrency` work functions running
/// at once, on a dedicated runtime.
///
/// The runtime gets one worker per job that can actually run concurrently,
/// so a limit far above the batch size does not start idle threads.
pub fn run_bounded<T, U, E, F>(
    jobs: Vec<Job<T>>,
    max_concurrency: usize,
    work: F,
) -> Result<Vec<JobResult<U>>, Error>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<BoxError> + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    if max_concurrency == 0 {
        return Err(Error::Config("max_concurrency must be at least 1".into()));
    }
    let runtime = Runtime::builder()
        .worker_threads(max_concurrency.min(jobs.len()).max(1))
        .thread_name_prefix("pipewright-bounded")
        .build()?;
    runtime.run_bounded(&CancelToken::new(), jobs, max_concurrency, work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn squares_in_input_order() {
        init_test("squares_in_input_order");
        let jobs = Job::batch([10_u64, 20, 30, 40, 50]);
        let results = run_bounded(jobs, 2, |x: u64| Ok::<_, Infallible>(x * x)).expect("run");
        let values: Vec<u64> = results
            .iter()
            .map(|r| *r.value().expect("success"))
            .collect();
        crate::assert_with_log!(
            values == vec![100, 400, 900, 1600, 2500],
            "squares aligned with inputs",
            vec![100, 400, 900, 1600, 2500],
            values
        );
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        crate::test_complete!("squares_in_input_order");
    }

    #[test]
    fn zero_concurrency_is_config_error() {
        let err = run_bounded(Job::batch([1]), 0, |x: i32| Ok::<_, Infallible>(x))
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn limit_far_above_batch_size_is_accepted() {
        init_test("limit_far_above_batch_size_is_accepted");
        let threads = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let seen = Arc::clone(&threads);
        let results = run_bounded(Job::batch([1_u32, 2, 3]), 10_000, move |x: u32| {
            seen.lock().insert(std::thread::current().id());
            Ok::<_, Infallible>(x + 1)
        })
        .expect("run");
        let values: Vec<u32> = results.iter().filter_map(|r| r.value().copied()).collect();
        assert_eq!(values, vec![2, 3, 4]);
        let used = threads.lock().len();
        crate::assert_with_log!(used <= 3, "worker threads used", "<= 3", used);
        crate::test_complete!("limit_far_above_batch_size_is_accepted");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let results =
            run_bounded(Vec::<Job<i32>>::new(), 3, |x: i32| Ok::<_, Infallible>(x)).expect("run");
        assert!(results.is_empty());
    }

    #[test]
    fn peak_concurrency_never_exceeds_limit() {
        init_test("peak_concurrency_never_exceeds_limit");
        let runtime = Runtime::builder().worker_threads(6).build().expect("runtime");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let results = runtime
            .run_bounded(&CancelToken::new(), Job::batch(0..24_u64), 3, move |x| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(3));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Infallible>(x)
            })
            .expect("run");
        assert_eq!(results.len(), 24);
        let peak = peak.load(Ordering::SeqCst);
        crate::assert_with_log!(peak <= 3, "peak within limit", "<= 3", peak);
        assert!(crate::test_utils::eventually(|| runtime.live_tasks() == 0));
        crate::test_complete!("peak_concurrency_never_exceeds_limit");
    }

    #[test]
    fn failures_stay_in_their_slot() {
        let results = run_bounded(Job::batch([1_i32, -1, 2]), 2, |x: i32| {
            if x < 0 { Err("negative payload") } else { Ok(x * 2) }
        })
        .expect("run");
        assert_eq!(results[0].value(), Some(&2));
        let worker = results[1].error().and_then(Error::as_worker).expect("worker error");
        assert_eq!(worker.index(), 1);
        assert_eq!(results[2].value(), Some(&4));
    }

    #[test]
    fn cancelled_token_yields_cancelled_results() {
        let runtime = Runtime::builder().worker_threads(2).build().expect("runtime");
        let token = CancelToken::new();
        token.cancel();
        let results = runtime
            .run_bounded(&token, Job::batch([1, 2, 3]), 1, |x: i32| Ok::<_, Infallible>(x))
            .expect("run");
        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| r.error().map(Error::kind) == Some(ErrorKind::Cancelled)));
    }
}
