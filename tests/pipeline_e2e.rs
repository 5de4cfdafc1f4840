//! End-to-end pipeline runs: fail-fast, deadlines, cancellation, fan-out.

use pipewright::{
    CancelKind, CancelReason, Error, ErrorKind, PipelineBuilder, PipelineConfig, PipelineState,
    Runtime,
};
use std::time::Duration;

fn init_test(name: &str) {
    pipewright::test_utils::init_test_logging();
    pipewright::test_phase!(name);
}

fn runtime() -> Runtime {
    Runtime::builder().worker_threads(4).build().expect("runtime")
}

fn reject_negative(x: i64) -> Result<i64, String> {
    if x < 0 {
        Err(format!("negative payload {x}"))
    } else {
        Ok(x * 10)
    }
}

#[test]
fn fail_fast_reports_failed_with_first_worker_error() {
    init_test("fail_fast_reports_failed_with_first_worker_error");
    let runtime = runtime();
    let mut pipeline = PipelineBuilder::<i64>::new()
        .stage(reject_negative)
        .cancel_on_first_error(true)
        .build(runtime.handle());
    pipeline.start([1, -1, 2]).expect("start");

    let report = pipeline.wait().expect("report");
    pipewright::assert_with_log!(
        report.state == PipelineState::Failed,
        "terminal state",
        PipelineState::Failed,
        report.state
    );
    let first = report.results.iter().find(|r| r.index == 0).expect("index 0");
    assert_eq!(first.value(), Some(&10));
    let failed = report.results.iter().find(|r| r.index == 1).expect("index 1");
    assert_eq!(failed.error().map(Error::kind), Some(ErrorKind::Worker));
    // Index 2 is either never delivered or reported as cancelled.
    if let Some(third) = report.results.iter().find(|r| r.index == 2) {
        pipewright::assert_with_log!(
            third.error().is_some_and(Error::is_cancellation),
            "result after fail-fast",
            "cancelled",
            third
        );
    }
    assert!(report.results.iter().filter(|r| r.is_ok()).all(|r| r.index == 0));

    let err = report.into_result().expect_err("failed run");
    assert_eq!(err.as_worker().map(pipewright::WorkerError::index), Some(1));
    pipewright::test_complete!("fail_fast_reports_failed_with_first_worker_error");
}

#[test]
fn fail_fast_never_delivers_later_successes() {
    init_test("fail_fast_never_delivers_later_successes");
    let runtime = runtime();
    for _ in 0..20 {
        let mut pipeline = PipelineBuilder::<i64>::new()
            .stage(reject_negative)
            .cancel_on_first_error(true)
            .build(runtime.handle());
        pipeline.start([1, -1, 2]).expect("start");
        let report = pipeline.wait().expect("report");
        assert_eq!(report.state, PipelineState::Failed);
        let late_success = report.results.iter().find(|r| r.index == 2 && r.is_ok());
        assert!(late_success.is_none(), "index 2 delivered as {late_success:?}");
    }
    pipewright::test_complete!("fail_fast_never_delivers_later_successes");
}

#[test]
fn timeout_surfaces_deadline_exceeded() {
    init_test("timeout_surfaces_deadline_exceeded");
    let runtime = runtime();
    let mut pipeline = PipelineBuilder::<u32>::new()
        .stage(|x: u32| {
            std::thread::sleep(Duration::from_millis(20));
            Ok::<_, Error>(x)
        })
        .timeout(Duration::from_millis(50))
        .build(runtime.handle());
    pipeline.start(0..50).expect("start");

    let err = pipeline.await_completion().expect_err("deadline");
    pipewright::assert_with_log!(
        err.kind() == ErrorKind::DeadlineExceeded,
        "terminal error",
        ErrorKind::DeadlineExceeded,
        err.kind()
    );
    assert_eq!(pipeline.state(), PipelineState::Cancelled);
    pipewright::test_complete!("timeout_surfaces_deadline_exceeded");
}

#[test]
fn explicit_cancel_stops_a_running_pipeline() {
    init_test("explicit_cancel_stops_a_running_pipeline");
    let runtime = runtime();
    let mut pipeline = PipelineBuilder::<u32>::new()
        .workers(2)
        .buffer(2)
        .parallel(|x: u32| {
            std::thread::sleep(Duration::from_millis(5));
            Ok::<_, Error>(x)
        })
        .build(runtime.handle());
    pipeline.start(0..1_000).expect("start");
    assert_eq!(pipeline.state(), PipelineState::Running);

    std::thread::sleep(Duration::from_millis(30));
    pipeline.cancel(CancelReason::user("operator stop"));
    pipeline.cancel(CancelReason::user("second stop is a no-op"));

    let report = pipeline.wait().expect("report");
    assert_eq!(report.state, PipelineState::Cancelled);
    assert!(report.results.len() < 1_000);
    assert_eq!(report.reason.as_ref().map(|r| r.kind), Some(CancelKind::User));
    assert_eq!(report.reason.as_ref().and_then(|r| r.message), Some("operator stop"));
    let err = report.into_result().expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(pipewright::test_utils::eventually(|| runtime.live_tasks() == 0));
    pipewright::test_complete!("explicit_cancel_stops_a_running_pipeline");
}

#[test]
fn dropping_a_running_pipeline_cancels_it() {
    init_test("dropping_a_running_pipeline_cancels_it");
    let runtime = runtime();
    let mut pipeline = PipelineBuilder::<u32>::new()
        .stage(|x: u32| {
            std::thread::sleep(Duration::from_millis(2));
            Ok::<_, Error>(x)
        })
        .build(runtime.handle());
    pipeline.start(0..10_000).expect("start");
    let token = pipeline.token().clone();
    drop(pipeline);
    assert!(token.is_done());
    assert!(pipewright::test_utils::eventually(|| runtime.live_tasks() == 0));
}

#[test]
fn mixed_stages_from_config_complete_in_order() {
    init_test("mixed_stages_from_config_complete_in_order");
    let runtime = runtime();
    let config = PipelineConfig {
        buffer: 3,
        workers: 3,
        rate_interval_ms: 1,
        ..PipelineConfig::default()
    };
    let mut pipeline = PipelineBuilder::<u64>::new()
        .with_config(&config)
        .stage(|x: u64| Ok::<_, Error>(x + 1))
        .parallel(|x: u64| {
            std::thread::sleep(Duration::from_millis(x % 4));
            Ok::<_, Error>(x * x)
        })
        .stage(|x: u64| Ok::<_, Error>(x.to_string()))
        .build(runtime.handle());
    pipeline.start(0..40).expect("start");

    let report = pipeline.wait().expect("report");
    assert_eq!(report.state, PipelineState::Completed);
    // One single-task stage, three fan-out workers, one single-task stage.
    assert_eq!(report.stages.len(), 5);
    let values: Vec<String> = report
        .into_result()
        .expect("completed")
        .into_iter()
        .map(|r| r.into_outcome().expect("value"))
        .collect();
    let expected: Vec<String> = (0..40_u64).map(|x| ((x + 1) * (x + 1)).to_string()).collect();
    assert_eq!(values, expected);
    pipewright::test_complete!("mixed_stages_from_config_complete_in_order");
}
