use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::time::sleep;

/// Reconnect schedule: one immediate attempt, then up to `max_retries`
/// retries, waiting `initial_delay` before the first and doubling after
/// every failure.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 100,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based): `initial_delay * 2^retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .map(|factor| self.initial_delay.saturating_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|retry| self.delay_for_retry(retry))
    }
}

/// Runs `operation` until it succeeds or the schedule is exhausted.
///
/// `operation` receives the 0-based attempt number. The error of the last
/// attempt is returned when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    backoff: &Backoff,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_backoff_if(backoff, operation_name, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but gives up at once on an error for which
/// `is_retryable` returns false.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    backoff: &Backoff,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => {
                info!("{operation_name} stopped after attempt {}: {e}", attempt + 1);
                return Err(e);
            }
            Err(e) if attempt >= backoff.max_retries => {
                warn!(
                    "{} failed after {} attempts: {}",
                    operation_name,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.delay_for_retry(attempt);
                info!(
                    "{} attempt {} failed: {}. Retrying in {:?} ({} tries left)",
                    operation_name,
                    attempt + 1,
                    e,
                    delay,
                    backoff.max_retries - attempt
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn delays_double() {
        let backoff = Backoff {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
        };
        let delays: Vec<u64> = backoff.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn huge_retry_counts_saturate() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_retry(99), Duration::MAX);
        assert_eq!(backoff.delays().count(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn eventual_success_waits_doubling_delays() {
        let backoff = Backoff {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
        };
        let attempts = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = attempts.clone();
        let result: Result<u32, String> = retry_with_backoff(&backoff, "test", |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().push(Instant::now());
                if attempt < 3 {
                    Err(format!("attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        let at = attempts.lock().clone();
        assert_eq!(at.len(), 4);
        for (i, expected_ms) in [500u64, 1_000, 2_000].into_iter().enumerate() {
            let gap = at[i + 1] - at[i];
            assert!(gap >= Duration::from_millis(expected_ms), "{gap:?}");
            assert!(gap < Duration::from_millis(expected_ms + 5), "{gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let backoff = Backoff {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry_with_backoff(&backoff, "test", |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("attempt {attempt}")) }
        })
        .await;

        assert_eq!(result, Err("attempt 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_the_schedule() {
        let backoff = Backoff {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
        };
        let started = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry_with_backoff_if(
            &backoff,
            "test",
            |e: &String| e != "fatal",
            |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 2 {
                        Err("fatal".to_string())
                    } else {
                        Err(format!("attempt {attempt}"))
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
