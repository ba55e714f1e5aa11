//! Retry/backoff policy shared by the AI queue and the insight aggregator

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Delay between a failed attempt and the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every attempt
    Fixed(Duration),
    /// `attempt * step`, counting attempts from 1
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step * attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Per-attempt deadline. An attempt that exceeds it is dropped.
    pub attempt_timeout: Option<Duration>,
    pub backoff: Backoff,
}

/// Errors that can flow through [`retry`]
pub trait Retryable: Sized {
    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool;

    fn timed_out(after: Duration) -> Self;

    fn cancelled() -> Self;
}

/// Run `op` under `policy`.
///
/// `op` receives the 1-based attempt number. Non-transient errors are
/// returned immediately; transient ones are retried until the attempts
/// run out, and the last error is returned. Cancelling `cancel` stops both
/// the running attempt and any backoff sleep.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let attempt_future = op(attempt);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(E::cancelled()),
            outcome = with_timeout(policy.attempt_timeout, attempt_future) => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !err.is_transient() {
            tracing::warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                transient = err.is_transient(),
                error = %err,
                "Final attempt failed"
            );
            return Err(err);
        }

        let delay = policy.backoff.delay(attempt);
        tracing::warn!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient failure"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(E::cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

async fn with_timeout<T, E, Fut>(limit: Option<Duration>, fut: Fut) -> Result<T, E>
where
    E: Retryable,
    Fut: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(E::timed_out(limit)),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
        TimedOut,
        Cancelled,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky | TestError::TimedOut)
        }

        fn timed_out(_: Duration) -> Self {
            TestError::TimedOut
        }

        fn cancelled() -> Self {
            TestError::Cancelled
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Some(Duration::from_secs(15)),
            backoff: Backoff::Linear(Duration::from_secs(1)),
        }
    }

    #[test]
    fn backoff_delays() {
        let linear = Backoff::Linear(Duration::from_millis(1000));
        assert_eq!(linear.delay(1), Duration::from_millis(1000));
        assert_eq!(linear.delay(3), Duration::from_millis(3000));

        let fixed = Backoff::Fixed(Duration::from_millis(500));
        assert_eq!(fixed.delay(7), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_use_every_attempt_with_linear_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), TestError> = retry(&policy(3), &CancellationToken::new(), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Flaky)
            }
        })
        .await;

        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), TestError> = retry(&policy(3), &CancellationToken::new(), |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            }
        })
        .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        let result = retry(&policy(2), &CancellationToken::new(), |attempt| async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, TestError>(attempt)
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), TestError> =
            retry(&policy(5), &cancel, |_| async { Err(TestError::Flaky) }).await;

        assert_eq!(result, Err(TestError::Cancelled));
    }
}
