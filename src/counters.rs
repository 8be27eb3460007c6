//! Retry attribution for one logical unit of work.
//!
//! A caller that wants to know how many retries a specific operation needed
//! (for example, syncing one story) attaches an `Arc<RetryCounters>` to each
//! request it issues. The transport bumps the counters in place; requests
//! without counters are simply not attributed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RetryCounters {
    total: AtomicU64,
    status_429: AtomicU64,
    status_5xx: AtomicU64,
    net: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryCountersSnapshot {
    pub total: u64,
    pub status_429: u64,
    pub status_5xx: u64,
    pub net: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryCause {
    Status429,
    Status5xx,
    Network,
}

impl RetryCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach<B>(self: &Arc<Self>, request: &mut http::Request<B>) {
        request.extensions_mut().insert(Arc::clone(self));
    }

    pub fn from_extensions(extensions: &http::Extensions) -> Option<&Arc<Self>> {
        extensions.get::<Arc<Self>>()
    }

    pub(crate) fn record(&self, cause: RetryCause) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match cause {
            RetryCause::Status429 => &self.status_429,
            RetryCause::Status5xx => &self.status_5xx,
            RetryCause::Network => &self.net,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RetryCountersSnapshot {
        RetryCountersSnapshot {
            total: self.total.load(Ordering::Relaxed),
            status_429: self.status_429.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            net: self.net.load(Ordering::Relaxed),
        }
    }
}

/// No-op when the request carries no counters.
pub(crate) fn record_retry(counters: Option<&Arc<RetryCounters>>, cause: RetryCause) {
    if let Some(counters) = counters {
        counters.record(cause);
    }
}
