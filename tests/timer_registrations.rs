//! Timer registrations are withdrawn once nobody waits for them.
//!
//! One test per binary: the driver is process-wide, so concurrent tests
//! would skew its pending count.

use pipewright::time::{driver, sleep};
use pipewright::{CancelToken, Error, PipelineBuilder, PipelineState, Runtime, block_on};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn abandoned_deadlines_leave_the_timer_driver() {
    pipewright::test_utils::init_test_logging();
    pipewright::test_phase!("abandoned_deadlines_leave_the_timer_driver");
    let timers = driver::global();
    let baseline = timers.pending();

    pipewright::test_phase!("cancelled tokens");
    for _ in 0..10_000 {
        let token = CancelToken::with_timeout(HOUR);
        token.cancel();
    }
    pipewright::assert_with_log!(
        timers.pending() == baseline,
        "pending after cancelling",
        baseline,
        timers.pending()
    );

    pipewright::test_phase!("dropped tokens");
    let root = CancelToken::new();
    let children: Vec<CancelToken> = (0..100).map(|_| root.child_with_timeout(HOUR)).collect();
    assert_eq!(timers.pending(), baseline + 100);
    drop(children);
    assert_eq!(timers.pending(), baseline);

    pipewright::test_phase!("sleep abandoned by or_cancel");
    let token = CancelToken::new();
    let canceller = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        })
    };
    let outcome = block_on(token.or_cancel(sleep(HOUR)));
    assert!(outcome.is_err());
    canceller.join().expect("canceller thread");
    assert_eq!(timers.pending(), baseline);

    pipewright::test_phase!("timed pipeline run");
    let runtime = Runtime::builder().worker_threads(2).build().expect("runtime");
    let mut pipeline = PipelineBuilder::<u32>::new()
        .stage(|x: u32| Ok::<_, Error>(x + 1))
        .timeout(HOUR)
        .build(runtime.handle());
    pipeline.start(0..16).expect("start");
    let report = pipeline.wait().expect("report");
    assert_eq!(report.state, PipelineState::Completed);
    assert_eq!(timers.pending(), baseline);
    pipewright::test_complete!("abandoned_deadlines_leave_the_timer_driver");
}
