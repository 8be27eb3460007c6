//! Time source used by the limiter and the retry loop.
//!
//! Every wait in this crate goes through a [`Clock`], so tests can swap in a
//! [`ManualClock`] and observe exact sleep totals without real delays.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::util::lock_unpoisoned;

pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for refill and deadline arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time, used to resolve HTTP-date `Retry-After` values.
    fn wall_now(&self) -> SystemTime;

    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock: `sleep` returns immediately and moves time forward.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: SystemTime,
    state: Mutex<ManualClockState>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    offset: Duration,
    slept: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_wall_origin(SystemTime::now())
    }

    pub fn with_wall_origin(wall_origin: SystemTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            state: Mutex::new(ManualClockState::default()),
        }
    }

    /// Moves time forward without counting it as slept.
    pub fn advance(&self, duration: Duration) {
        let mut state = lock_unpoisoned(&self.state);
        state.offset = state.offset.saturating_add(duration);
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        lock_unpoisoned(&self.state).offset
    }

    /// Sum of all durations passed to [`Clock::sleep`].
    pub fn total_slept(&self) -> Duration {
        lock_unpoisoned(&self.state).slept
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_now(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let mut state = lock_unpoisoned(&self.state);
        state.offset = state.offset.saturating_add(duration);
        state.slept = state.slept.saturating_add(duration);
    }
}
