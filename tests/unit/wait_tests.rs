//! Unit tests for the bounded polling helper.

use std::cell::Cell;
use std::time::Duration;

use evals_runner::wait::{wait_for, WaitOutcome};

#[tokio::test]
async fn true_predicate_is_satisfied_immediately() {
    let calls = Cell::new(0);

    let outcome = wait_for(
        || {
            calls.set(calls.get() + 1);
            true
        },
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
    .await;

    assert_eq!(outcome, WaitOutcome::Satisfied);
    assert_eq!(calls.get(), 1, "predicate must be checked before the first interval");
}

#[tokio::test(start_paused = true)]
async fn predicate_is_rechecked_on_each_tick() {
    let calls = Cell::new(0);

    let outcome = wait_for(
        || {
            calls.set(calls.get() + 1);
            calls.get() >= 3
        },
        Duration::from_millis(250),
        Duration::from_secs(5),
    )
    .await;

    assert!(outcome.is_satisfied());
    assert_eq!(calls.get(), 3);
}

#[tokio::test(start_paused = true)]
async fn false_predicate_times_out() {
    let start = tokio::time::Instant::now();

    let outcome = wait_for(|| false, Duration::from_millis(250), Duration::from_secs(1)).await;

    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(!outcome.is_satisfied());
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_still_checks_once() {
    let outcome = wait_for(|| true, Duration::from_millis(250), Duration::ZERO).await;
    assert_eq!(outcome, WaitOutcome::Satisfied);
}
