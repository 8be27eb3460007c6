use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};
use rand::Rng;

/// Jitter added to an exponential delay: `(delay, attempt) -> extra`.
pub type JitterFn = Arc<dyn Fn(Duration, u32) -> Duration + Send + Sync>;

pub const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 502, 503, 504];

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status.as_u16())
}

/// Uniform in `[0, delay)`.
pub fn full_jitter(delay: Duration, _attempt: u32) -> Duration {
    let delay_nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
    if delay_nanos == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_nanos(rng.random_range(0..delay_nanos))
}

pub fn no_jitter(_delay: Duration, _attempt: u32) -> Duration {
    Duration::ZERO
}

/// `min(base * 2^attempt, cap)` plus jitter, clamped to `cap` again.
///
/// `attempt` is the zero-based index of the attempt that just failed.
pub fn backoff_delay(
    base: Duration,
    cap: Duration,
    attempt: u32,
    jitter: &(dyn Fn(Duration, u32) -> Duration + Send + Sync),
) -> Duration {
    let multiplier = 1_u32 << attempt.min(31);
    let delay = base.saturating_mul(multiplier).min(cap);
    delay.saturating_add(jitter(delay, attempt)).min(cap)
}

/// `None` when the header is absent. A present value that is neither
/// delta-seconds nor an HTTP-date yields zero; so does a date in the past.
pub fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let Ok(raw_value) = value.to_str() else {
        return Some(Duration::ZERO);
    };
    let raw_value = raw_value.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let Ok(date) = httpdate::parse_http_date(raw_value) else {
        return Some(Duration::ZERO);
    };
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}
