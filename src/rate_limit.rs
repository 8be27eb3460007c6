use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::context::Context;
use crate::error::ContextError;
use crate::util::lock_unpoisoned;

pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(5);

/// Static per-host ceiling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limit {
    pub rps: f64,
    pub burst: u32,
}

impl Limit {
    pub const fn new(rps: f64, burst: u32) -> Self {
        Self { rps, burst }
    }

    pub(crate) fn normalize(self) -> Self {
        Self {
            rps: if self.rps.is_finite() && self.rps > 0.0 {
                self.rps
            } else {
                1.0
            },
            burst: self.burst.max(1),
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::new(10.0, 10)
    }
}

#[derive(Debug)]
struct BucketState {
    rps: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, burst: f64) {
        if now <= self.last_refill_at {
            return;
        }
        let elapsed_secs = now.duration_since(self.last_refill_at).as_secs_f64();
        self.last_refill_at = now;
        self.tokens = (self.tokens + elapsed_secs * self.rps).min(burst);
    }

    fn wait_duration(&self) -> Duration {
        let needed_tokens = (1.0 - self.tokens).max(0.0);
        let delay_secs = needed_tokens / self.rps;
        if delay_secs <= f64::EPSILON {
            Duration::ZERO
        } else {
            // Near-zero rates overflow `Duration`; callers sleep one poll slice at a time.
            Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
        }
    }
}

/// Per-host token bucket with fractional tokens and an adjustable refill rate.
///
/// Tokens refill lazily on every acquisition attempt; the bucket starts full so
/// the first `burst` requests to a cold host go out without delay.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    burst: f64,
    max_rps: f64,
    clock: Arc<dyn Clock>,
    poll_slice: Duration,
}

impl TokenBucket {
    pub fn new(limit: Limit, clock: Arc<dyn Clock>) -> Self {
        Self::with_poll_slice(limit, clock, DEFAULT_POLL_SLICE)
    }

    pub fn with_poll_slice(limit: Limit, clock: Arc<dyn Clock>, poll_slice: Duration) -> Self {
        let limit = limit.normalize();
        let now = clock.now();
        Self {
            state: Mutex::new(BucketState {
                rps: limit.rps,
                tokens: f64::from(limit.burst),
                last_refill_at: now,
            }),
            burst: f64::from(limit.burst),
            max_rps: limit.rps,
            clock,
            poll_slice: poll_slice.max(Duration::from_micros(1)),
        }
    }

    /// Blocks until a token is available, then consumes it.
    ///
    /// Sleeps in slices of at most the poll slice so cancellation is noticed
    /// promptly; the bucket lock is never held while sleeping.
    pub fn wait(&self, context: &Context) -> Result<(), ContextError> {
        loop {
            let now = self.clock.now();
            context.check(now)?;

            let wait = {
                let mut state = lock_unpoisoned(&self.state);
                state.refill(now, self.burst);
                if state.tokens >= 1.0 {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    return Ok(());
                }
                state.wait_duration()
            };

            self.clock
                .sleep(wait.min(self.poll_slice).max(Duration::from_nanos(1)));
        }
    }

    /// Consumes a token only if one is ready right now.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = lock_unpoisoned(&self.state);
        state.refill(now, self.burst);
        if state.tokens >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// `rps = clamp(rps + delta, min, max)`.
    pub fn adjust_rps(&self, delta: f64, min: f64, max: f64) {
        let max = max.max(min);
        let now = self.clock.now();
        let mut state = lock_unpoisoned(&self.state);
        // Tokens accrued so far belong to the old rate.
        state.refill(now, self.burst);
        state.rps = (state.rps + delta).clamp(min, max);
    }

    pub fn rps(&self) -> f64 {
        lock_unpoisoned(&self.state).rps
    }

    /// Configured ceiling for this host.
    pub fn max_rps(&self) -> f64 {
        self.max_rps
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    pub fn tokens(&self) -> f64 {
        let now = self.clock.now();
        let mut state = lock_unpoisoned(&self.state);
        state.refill(now, self.burst);
        state.tokens
    }
}
