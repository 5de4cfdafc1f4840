//! Pacing: emission gaps never drop below the interval.

use pipewright::channel::channel;
use pipewright::{CancelToken, ErrorKind, RateLimiter, Runtime, block_on, pace};
use std::time::{Duration, Instant};

const INTERVAL: Duration = Duration::from_millis(2);
const TOLERANCE: Duration = Duration::from_micros(200);

fn init_test(name: &str) {
    pipewright::test_utils::init_test_logging();
    pipewright::test_phase!(name);
}

#[test]
fn limiter_spaces_fifty_emissions() {
    init_test("limiter_spaces_fifty_emissions");
    let token = CancelToken::new();
    let mut limiter = RateLimiter::new(INTERVAL);
    let emissions: Vec<Instant> = block_on(async {
        let mut emissions = Vec::with_capacity(50);
        for _ in 0..50 {
            limiter.until_ready(&token).await.expect("slot");
            emissions.push(Instant::now());
        }
        emissions
    });

    let shortest = emissions
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .min()
        .expect("49 gaps");
    pipewright::assert_with_log!(
        shortest + TOLERANCE >= INTERVAL,
        "minimum gap",
        INTERVAL,
        shortest
    );
    pipewright::test_complete!("limiter_spaces_fifty_emissions");
}

#[test]
fn paced_stream_takes_at_least_n_minus_one_intervals() {
    init_test("paced_stream_takes_at_least_n_minus_one_intervals");
    let runtime = Runtime::builder().worker_threads(2).build().expect("runtime");
    let token = CancelToken::new();
    let (tx, rx) = channel(64);
    for item in 0..50_u32 {
        tx.try_send(item).expect("room");
    }
    drop(tx);

    let start = Instant::now();
    let paced = pace(runtime.handle(), &token, rx, INTERVAL, 4);
    let items = paced.collect_blocking();
    let elapsed = start.elapsed();

    assert_eq!(items, (0..50).collect::<Vec<_>>());
    assert!(elapsed + TOLERANCE >= INTERVAL * 49, "too fast: {elapsed:?}");
    pipewright::test_complete!("paced_stream_takes_at_least_n_minus_one_intervals");
}

#[test]
fn cancelled_pacer_emits_nothing_more() {
    let runtime = Runtime::builder().worker_threads(1).build().expect("runtime");
    let token = CancelToken::new();
    let (tx, rx) = channel(8);
    for item in 0..8_u8 {
        tx.try_send(item).expect("room");
    }
    let paced = pace(runtime.handle(), &token, rx, Duration::from_secs(10), 8);
    assert_eq!(paced.recv_blocking(&CancelToken::new()), Ok(0));
    token.cancel();
    assert!(paced.collect_blocking().is_empty());
}

#[test]
fn wait_beyond_window_is_a_timeout() {
    let token = CancelToken::new();
    let mut limiter = RateLimiter::new(Duration::from_secs(5));
    assert!(limiter.try_ready());
    let err = block_on(limiter.until_ready_within(&token, Duration::from_millis(10)))
        .expect_err("slot is seconds away");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
