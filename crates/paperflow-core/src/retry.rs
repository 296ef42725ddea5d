//! Exponential backoff around fallible source calls.

use std::future::Future;
use std::time::Duration;

use crate::error::SourceError;

/// How a failed request is retried.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Growth factor between consecutive waits (values below 1.0 act as 1.0).
    pub multiplier: f64,
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Upper bound on a single computed wait.
    pub max_delay: Option<Duration>,
    /// Which errors are worth another attempt.
    pub retry_if: fn(&SourceError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_retries: 3,
            max_delay: None,
            retry_if: SourceError::is_transient,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("initial_delay", &self.initial_delay)
            .field("multiplier", &self.multiplier)
            .field("max_retries", &self.max_retries)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Computed wait before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let delay = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or retries run out.
///
/// `attempt_fn` receives the 1-based attempt number. Errors rejected by
/// `policy.retry_if` are returned unchanged. Once `max_retries + 1` attempts
/// have failed, the last error is returned inside [`SourceError::Exhausted`].
/// Waits never shrink from one retry to the next; a server `Retry-After`
/// can only lengthen them.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, SourceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt: u32 = 0;
    let mut previous_delay = Duration::ZERO;

    loop {
        attempt += 1;
        let err = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !(policy.retry_if)(&err) {
            return Err(err);
        }
        if attempt > policy.max_retries {
            tracing::warn!(operation, attempts = attempt, error = %err, "retries exhausted");
            return Err(SourceError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let mut delay = policy.delay_for(attempt - 1).max(previous_delay);
        if let Some(server_wait) = err.retry_after() {
            delay = delay.max(server_wait);
        }
        previous_delay = delay;

        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_retries,
            max_delay: None,
            retry_if: SourceError::is_transient,
        }
    }

    #[test]
    fn delays_grow_by_multiplier() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn max_delay_caps_growth() {
        let policy = RetryPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let policy = RetryPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(3), policy.delay_for(0));
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_makes_max_retries_plus_one_attempts() {
        let stamps = Mutex::new(Vec::new());
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| {
            stamps.lock().unwrap().push(Instant::now());
            async { Err(SourceError::transient("connection reset")) }
        })
        .await;

        match result {
            Err(SourceError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_transient());
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| {
            *calls.lock().unwrap() += 1;
            async { Err(SourceError::permanent("malformed query")) }
        })
        .await;
        assert!(matches!(result, Err(SourceError::Permanent { .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| {
            *calls.lock().unwrap() += 1;
            async { Err(SourceError::NotFound("2401.99999".into())) }
        })
        .await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let result = with_retry(&fast_policy(3), "test", |attempt| async move {
            if attempt < 3 {
                Err(SourceError::from_status(503, None))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_lengthens_but_never_shortens() {
        let stamps = Mutex::new(Vec::new());
        let _: Result<(), _> = with_retry(&fast_policy(2), "test", |attempt| {
            stamps.lock().unwrap().push(Instant::now());
            async move {
                let retry_after = (attempt == 1).then(|| Duration::from_secs(5));
                Err(SourceError::from_status(429, retry_after))
            }
        })
        .await;

        let stamps = stamps.into_inner().unwrap();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps[0], Duration::from_secs(5));
        assert!(gaps[1] >= gaps[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_fails_after_one_attempt() {
        let result: Result<(), _> = with_retry(&RetryPolicy::none(), "test", |_| async {
            Err(SourceError::transient("timeout"))
        })
        .await;
        assert!(matches!(
            result,
            Err(SourceError::Exhausted { attempts: 1, .. })
        ));
    }
}
