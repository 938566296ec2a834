use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Monotonic clock plus the suspension primitive the trial loop awaits on.
pub trait Timer: Clone + Send + Sync {
    type Timestamp: Copy + Clone + Send + Sync;
    fn now(&self) -> Self::Timestamp;
    fn elapsed(&self, ts: Self::Timestamp) -> Duration;
    fn sleep(&self, d: Duration) -> impl Future<Output = ()> + Send;

    /// Time since this timer was created.
    fn since_start(&self) -> Duration;
}

/// `Duration` from a millisecond parameter value.
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Timer backed by the tokio clock, so paused-time tests control it.
#[derive(Debug, Clone)]
pub struct MonotonicTimer {
    pub start: Instant,
}

impl Timer for MonotonicTimer {
    /// Nanoseconds since `start`.
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn sleep(&self, d: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(d)
    }

    fn since_start(&self) -> Duration {
        self.start.elapsed()
    }
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_paused_clock() {
        let timer = MonotonicTimer::new();
        let t0 = timer.now();
        timer.sleep(millis(1_500)).await;
        let elapsed = timer.elapsed(t0);
        assert!(elapsed >= Duration::from_millis(1_500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_502), "{elapsed:?}");
        assert!(timer.since_start() >= elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_saturates_for_future_timestamps() {
        let timer = MonotonicTimer::new();
        let later = timer.now() + 1_000_000;
        assert_eq!(timer.elapsed(later), Duration::ZERO);
    }
}
