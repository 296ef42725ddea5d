//! Minimum-delay request spacing with adaptive slowdown.
//!
//! Every outbound request waits on [`MinDelayLimiter::acquire`], which
//! enforces a fixed gap after the previous request. On 429 the gap is widened
//! and restored after a quiet period.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SourceError;

const MAX_SLOWDOWN: u32 = 16;
const DECAY_AFTER: Duration = Duration::from_secs(60);

/// Serializes requests so consecutive ones are at least `delay` apart.
///
/// The lock is held across the wait, so concurrent callers queue up and are
/// released one per interval. The state is owned by this instance; two
/// limiters never share spacing.
pub struct MinDelayLimiter {
    base_delay: Duration,
    /// Instant of the most recent request released by the limiter.
    last_request: Mutex<Option<Instant>>,
    /// Current slowdown factor (1 = normal, 2 = double spacing, etc.).
    current_factor: AtomicU32,
    /// Timestamp of the last 429 response.
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl MinDelayLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            last_request: Mutex::new(None),
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The spacing currently enforced, including any 429 slowdown.
    pub fn current_delay(&self) -> Duration {
        self.base_delay
            .checked_mul(self.current_factor.load(Ordering::SeqCst))
            .unwrap_or(self.base_delay)
    }

    pub fn current_factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }

    /// Wait until a request may be sent, then record it as sent.
    pub async fn acquire(&self) {
        self.try_decay();
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.current_delay();
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "rate limiter: waiting"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Called when a 429 is received. Doubles the slowdown factor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            });
        tracing::warn!(
            factor = self.current_factor(),
            delay_ms = self.current_delay().as_millis() as u64,
            "rate limited by source, widening request spacing"
        );
    }

    /// If 60s have passed since the last 429, restore the base spacing.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed() >= DECAY_AFTER))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            tracing::debug!("rate limiter: restored base spacing");
        }
    }
}

/// Map a non-success response to a classified [`SourceError`].
///
/// Returns `Ok(())` for 2xx. For 429 and 503 the `Retry-After` header is
/// carried on the error.
pub fn check_response_status(resp: &reqwest::Response) -> Result<(), SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    Err(SourceError::from_status(status.as_u16(), retry_after))
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date (e.g. "Wed, 21 Oct 2015 07:28:00 GMT"): use a conservative fixed wait
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
    }

    #[test]
    fn parse_http_date() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    // ── check_response_status ──────────────────────────────────────────

    #[test]
    fn ok_on_200() {
        let http_resp = http::Response::builder().status(200).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(check_response_status(&resp).is_ok());
    }

    #[test]
    fn too_many_requests_carries_retry_after() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_response_status(&resp).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn bad_request_is_permanent() {
        let http_resp = http::Response::builder().status(400).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        let err = check_response_status(&resp).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(400));
    }

    // ── MinDelayLimiter ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = MinDelayLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_acquires_are_spaced() {
        let limiter = MinDelayLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_when_delay_already_elapsed() {
        let limiter = MinDelayLimiter::new(Duration::from_secs(3));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialized() {
        let limiter = std::sync::Arc::new(MinDelayLimiter::new(Duration::from_secs(1)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move {
                l.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn on_rate_limited_doubles_and_caps() {
        let limiter = MinDelayLimiter::new(Duration::from_millis(100));
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor(), 2);
        assert_eq!(limiter.current_delay(), Duration::from_millis(200));
        for _ in 0..10 {
            limiter.on_rate_limited();
        }
        assert_eq!(limiter.current_factor(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn decay_restores_after_60s() {
        let limiter = MinDelayLimiter::new(Duration::from_millis(100));
        limiter.on_rate_limited();
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor(), 4);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.acquire().await;
        assert_eq!(limiter.current_factor(), 1);
    }
}
