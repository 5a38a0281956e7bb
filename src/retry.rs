use crate::error::{FetchError, PipelineError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded exponential backoff around one fallible external call.
///
/// The policy is a plain value; every call to [`RetryPolicy::run`] keeps its
/// own attempt counter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    pub retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 5)
    }
}

impl RetryPolicy {
    pub fn new(min_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            max_attempts: max_attempts.max(1),
            retryable: FetchError::is_retryable,
        }
    }

    /// Wait applied after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(self.min_backoff)
    }

    /// A fresh attempt budget for one operation.
    pub fn attempts(&self, operation: &'static str) -> Attempts {
        Attempts {
            policy: *self,
            operation,
            failed: 0,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempts = self.attempts(operation);
        loop {
            match call().await {
                Ok(value) => {
                    if attempts.failed() > 0 {
                        tracing::info!(operation, attempt = attempts.failed() + 1, "succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => sleep(attempts.record_failure(err)?).await,
            }
        }
    }
}

/// Failure counter for one operation, for callers whose failures do not all
/// come from a single call, such as a stream that breaks after connecting.
#[derive(Debug)]
pub struct Attempts {
    policy: RetryPolicy,
    operation: &'static str,
    failed: u32,
}

impl Attempts {
    pub fn failed(&self) -> u32 {
        self.failed
    }

    /// Starts the budget over after the operation made real progress.
    pub fn reset(&mut self) {
        self.failed = 0;
    }

    /// Counts `err` against the budget. Returns the wait before the next
    /// attempt, or the error that ends the operation.
    pub fn record_failure(&mut self, err: FetchError) -> Result<Duration, PipelineError> {
        if !(self.policy.retryable)(&err) {
            return Err(PipelineError::Fetch(err));
        }
        self.failed += 1;
        if self.failed >= self.policy.max_attempts {
            return Err(PipelineError::RetriesExhausted {
                operation: self.operation,
                attempts: self.failed,
                source: err,
            });
        }
        let delay = self.policy.delay_after(self.failed);
        tracing::warn!(
            operation = self.operation,
            attempt = self.failed,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure; backing off"
        );
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn reset() -> FetchError {
        FetchError::transport("test", io::Error::from(io::ErrorKind::ConnectionReset))
    }

    #[test]
    fn backoff_doubles_from_one_second_and_caps_at_ten() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = RetryPolicy::default()
            .run("connect", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(reset()) }
            })
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::RetriesExhausted { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 1 + 2 + 4 + 8 between the five attempts, no wait after the last.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(15) && waited < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let value = RetryPolicy::default()
            .run("lookup", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        Err(reset())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("connect", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::Status {
                        service: "test",
                        status: 401,
                        body: String::new(),
                    })
                }
            })
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Fetch(FetchError::Status { status: 401, .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_budget_starts_over() {
        let mut attempts = RetryPolicy::default().attempts("stream connect");
        for expected in [1, 2, 4, 8] {
            assert_eq!(attempts.record_failure(reset()).unwrap(), Duration::from_secs(expected));
        }
        attempts.reset();
        assert_eq!(attempts.record_failure(reset()).unwrap(), Duration::from_secs(1));
        assert_eq!(attempts.failed(), 1);
    }

    #[test]
    fn fifth_recorded_failure_is_final() {
        let mut attempts = RetryPolicy::default().attempts("stream connect");
        for _ in 0..4 {
            attempts.record_failure(reset()).unwrap();
        }
        let err = attempts.record_failure(reset()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RetriesExhausted {
                operation: "stream connect",
                attempts: 5,
                ..
            }
        ));
    }
}
