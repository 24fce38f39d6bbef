//! Retry policy for store operations.
//!
//! Only [`Error::Transient`] failures are retried. Anything else is returned
//! to the caller unchanged on the first occurrence. Between attempts the
//! policy sleeps according to a fixed delay schedule whose last entry is
//! reused once the schedule runs out.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Error;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
];

/// How many times to run an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy allowing `attempts` runs in total.
    ///
    /// `delays[min(n, len - 1)]` is slept after the n-th failed attempt.
    pub fn new(attempts: u32, delays: Vec<Duration>) -> Result<Self, Error> {
        if attempts == 0 {
            return Err(Error::invalid("retry attempts must be at least 1"));
        }
        if delays.is_empty() {
            return Err(Error::invalid("retry delay schedule is empty"));
        }
        Ok(Self { attempts, delays })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay after `failed_attempts` failures.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let n = usize::try_from(failed_attempts).unwrap_or(usize::MAX);
        self.delays[n.min(self.delays.len() - 1)]
    }

    /// Runs `operation` until it succeeds, fails non-transiently, or the
    /// attempts are used up.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.execute_cancellable(&CancellationToken::new(), operation)
            .await
    }

    /// Like [`RetryPolicy::execute`], but stops with [`Error::Cancelled`] as
    /// soon as `cancel` fires, whether an attempt or a delay is in flight.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.attempts {
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                attempt,
                attempts = self.attempts,
                ?delay,
                error = %err,
                "transient store failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delays: DEFAULT_DELAYS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, vec![Duration::from_millis(1)]).unwrap()
    }

    #[test]
    fn rejects_zero_attempts_and_empty_schedule() {
        assert!(matches!(
            RetryPolicy::new(0, vec![Duration::from_secs(1)]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            RetryPolicy::new(3, Vec::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn schedule_reuses_last_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(5));

        let single = RetryPolicy::new(3, vec![Duration::from_millis(7)]).unwrap();
        assert_eq!(single.delay_for_attempt(1), Duration::from_millis(7));
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = fast(3)
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Error::Transient("connection reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_failure_sleeps_the_second_delay() {
        let policy =
            RetryPolicy::new(2, vec![Duration::from_secs(60), Duration::from_millis(5)]).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let run = policy.execute(|| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::Transient("connection reset".into()))
                } else {
                    Ok(())
                }
            }
        });
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("slept the first schedule entry")
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), Error> = fast(3)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NonTransient("WRONGTYPE".into())) }
            })
            .await;

        match result {
            Err(Error::NonTransient(msg)) => assert_eq!(msg, "WRONGTYPE"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), Error> = fast(3)
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(Error::Transient(format!("failure {n}"))) }
            })
            .await;

        match result {
            Err(Error::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::Transient(ref m) if m == "failure 3"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let result: Result<(), Error> = fast(1)
            .execute(|| async { Err(Error::Transient("timeout".into())) })
            .await;
        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_further_attempts() {
        let policy = RetryPolicy::new(5, vec![Duration::from_secs(60)]).unwrap();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), Error> = policy
            .execute_cancellable(&cancel, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Transient("connection refused".into())) }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result = fast(3)
            .execute_cancellable(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
