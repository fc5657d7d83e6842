//! Bounded polling of a synchronous condition.

use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};

/// Result of a [`wait_for`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate returned `true` before the deadline.
    Satisfied,
    /// The deadline passed with the predicate still `false`.
    TimedOut,
}

impl WaitOutcome {
    /// Whether the predicate was satisfied.
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        self == Self::Satisfied
    }
}

/// Evaluate `predicate` immediately and then every `interval` until it holds
/// or `timeout` elapses.
///
/// The predicate is evaluated once more at the deadline, so a condition that
/// becomes true during the final interval is still reported as satisfied.
pub async fn wait_for<F>(mut predicate: F, interval: Duration, timeout: Duration) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = time::sleep_until(deadline) => {
                return if predicate() {
                    WaitOutcome::Satisfied
                } else {
                    WaitOutcome::TimedOut
                };
            }

            _ = ticker.tick() => {
                if predicate() {
                    return WaitOutcome::Satisfied;
                }
            }
        }
    }
}
