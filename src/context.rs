use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::ContextError;

/// Cancellation scope for one request, carried in the request extensions.
///
/// Clones share the cancellation flag, so a caller can keep one handle and
/// cancel a request that is blocked in another thread.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Deadline relative to `clock`, so virtual clocks produce virtual deadlines.
    pub fn with_timeout(self, clock: &dyn Clock, timeout: Duration) -> Self {
        let deadline = clock.now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self, now: Instant) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && now >= deadline
        {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn attach<B>(&self, request: &mut http::Request<B>) {
        request.extensions_mut().insert(self.clone());
    }

    pub fn from_extensions(extensions: &http::Extensions) -> Option<&Self> {
        extensions.get::<Self>()
    }
}

/// Sleeps `duration` in slices of at most `slice`, checking `context` before
/// each slice. Returns how long was actually slept.
pub(crate) fn sleep_with_context(
    clock: &dyn Clock,
    context: &Context,
    duration: Duration,
    slice: Duration,
) -> Result<Duration, (ContextError, Duration)> {
    let slice = slice.max(Duration::from_micros(1));
    let mut slept = Duration::ZERO;
    while slept < duration {
        if let Err(error) = context.check(clock.now()) {
            return Err((error, slept));
        }
        let step = (duration - slept).min(slice);
        clock.sleep(step);
        slept += step;
    }
    Ok(slept)
}
