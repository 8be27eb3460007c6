use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use http::Method;

use crate::util::{duration_nanos, lock_unpoisoned};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_retries: u64,
    pub total_backoff_nanos: u64,
    pub read_requests: u64,
    pub write_requests: u64,
    pub host_requests: BTreeMap<String, u64>,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_429: u64,
    pub status_5xx: u64,
}

impl MetricsSnapshot {
    pub fn total_backoff(&self) -> Duration {
        Duration::from_nanos(self.total_backoff_nanos)
    }

    /// Activity between `earlier` and `self`. Counters saturate at zero, and
    /// hosts with no new requests are left out.
    pub fn since(&self, earlier: &Self) -> Self {
        let host_requests = self
            .host_requests
            .iter()
            .filter_map(|(host, count)| {
                let before = earlier.host_requests.get(host).copied().unwrap_or(0);
                let delta = count.saturating_sub(before);
                (delta > 0).then(|| (host.clone(), delta))
            })
            .collect();

        Self {
            total_requests: self.total_requests.saturating_sub(earlier.total_requests),
            total_retries: self.total_retries.saturating_sub(earlier.total_retries),
            total_backoff_nanos: self
                .total_backoff_nanos
                .saturating_sub(earlier.total_backoff_nanos),
            read_requests: self.read_requests.saturating_sub(earlier.read_requests),
            write_requests: self.write_requests.saturating_sub(earlier.write_requests),
            host_requests,
            status_2xx: self.status_2xx.saturating_sub(earlier.status_2xx),
            status_3xx: self.status_3xx.saturating_sub(earlier.status_3xx),
            status_4xx: self.status_4xx.saturating_sub(earlier.status_4xx),
            status_429: self.status_429.saturating_sub(earlier.status_429),
            status_5xx: self.status_5xx.saturating_sub(earlier.status_5xx),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "requests={} (read={} write={}) retries={} backoff={:.1}s status[2xx={} 3xx={} 4xx={} 429={} 5xx={}]",
            self.total_requests,
            self.read_requests,
            self.write_requests,
            self.total_retries,
            self.total_backoff().as_secs_f64(),
            self.status_2xx,
            self.status_3xx,
            self.status_4xx,
            self.status_429,
            self.status_5xx,
        )
    }
}

/// Shared request counters. Clones observe and update the same state.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: AtomicU64,
    total_retries: AtomicU64,
    total_backoff_nanos: AtomicU64,
    read_requests: AtomicU64,
    write_requests: AtomicU64,
    breakdown: Mutex<Breakdown>,
}

#[derive(Debug, Default)]
struct Breakdown {
    host_requests: BTreeMap<String, u64>,
    status_2xx: u64,
    status_3xx: u64,
    status_4xx: u64,
    status_429: u64,
    status_5xx: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used by `TransportOptions::default()`.
    pub fn global() -> &'static Metrics {
        static GLOBAL: OnceLock<Metrics> = OnceLock::new();
        GLOBAL.get_or_init(Metrics::new)
    }

    pub fn inc_request(&self, host: &str, method: &Method) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
        match *method {
            Method::GET => {
                self.inner.read_requests.fetch_add(1, Ordering::Relaxed);
            }
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => {
                self.inner.write_requests.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let mut breakdown = lock_unpoisoned(&self.inner.breakdown);
        *breakdown.host_requests.entry(host.to_owned()).or_insert(0) += 1;
    }

    pub fn inc_retry(&self) {
        self.inner.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_backoff(&self, duration: Duration) {
        self.inner
            .total_backoff_nanos
            .fetch_add(duration_nanos(duration), Ordering::Relaxed);
    }

    pub fn inc_status(&self, status: u16) {
        if status < 200 {
            return;
        }
        let mut breakdown = lock_unpoisoned(&self.inner.breakdown);
        let bucket = match status {
            429 => &mut breakdown.status_429,
            200..=299 => &mut breakdown.status_2xx,
            300..=399 => &mut breakdown.status_3xx,
            400..=499 => &mut breakdown.status_4xx,
            _ => &mut breakdown.status_5xx,
        };
        *bucket += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let breakdown = lock_unpoisoned(&self.inner.breakdown);
        MetricsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            total_retries: self.inner.total_retries.load(Ordering::Relaxed),
            total_backoff_nanos: self.inner.total_backoff_nanos.load(Ordering::Relaxed),
            read_requests: self.inner.read_requests.load(Ordering::Relaxed),
            write_requests: self.inner.write_requests.load(Ordering::Relaxed),
            host_requests: breakdown.host_requests.clone(),
            status_2xx: breakdown.status_2xx,
            status_3xx: breakdown.status_3xx,
            status_4xx: breakdown.status_4xx,
            status_429: breakdown.status_429,
            status_5xx: breakdown.status_5xx,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::Method;

    use super::Metrics;

    #[test]
    fn methods_are_classified_as_reads_and_writes() {
        let metrics = Metrics::new();
        metrics.inc_request("mapi.storyblok.com", &Method::GET);
        metrics.inc_request("mapi.storyblok.com", &Method::POST);
        metrics.inc_request("mapi.storyblok.com", &Method::PUT);
        metrics.inc_request("mapi.storyblok.com", &Method::PATCH);
        metrics.inc_request("api.storyblok.com", &Method::DELETE);
        metrics.inc_request("api.storyblok.com", &Method::HEAD);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 6);
        assert_eq!(snapshot.read_requests, 1);
        assert_eq!(snapshot.write_requests, 4);
        assert_eq!(snapshot.host_requests.get("mapi.storyblok.com"), Some(&4));
        assert_eq!(snapshot.host_requests.get("api.storyblok.com"), Some(&2));
    }

    #[test]
    fn status_codes_land_in_exclusive_buckets() {
        let metrics = Metrics::new();
        for status in [100, 199, 200, 204, 301, 404, 429, 429, 500, 503, 599] {
            metrics.inc_status(status);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.status_2xx, 2);
        assert_eq!(snapshot.status_3xx, 1);
        assert_eq!(snapshot.status_4xx, 1);
        assert_eq!(snapshot.status_429, 2);
        assert_eq!(snapshot.status_5xx, 3);
    }

    #[test]
    fn snapshots_do_not_alias_internal_state() {
        let metrics = Metrics::new();
        metrics.inc_request("api.storyblok.com", &Method::GET);
        let before = metrics.snapshot();

        metrics.inc_request("api.storyblok.com", &Method::GET);
        metrics.inc_request("mapi.storyblok.com", &Method::POST);
        metrics.inc_retry();
        metrics.add_backoff(Duration::from_millis(250));
        let after = metrics.snapshot();

        assert_eq!(before.total_requests, 1);
        assert_eq!(before.host_requests.len(), 1);
        assert_eq!(before.host_requests.get("api.storyblok.com"), Some(&1));

        let delta = after.since(&before);
        assert_eq!(delta.total_requests, 2);
        assert_eq!(delta.read_requests, 1);
        assert_eq!(delta.write_requests, 1);
        assert_eq!(delta.total_retries, 1);
        assert_eq!(delta.total_backoff(), Duration::from_millis(250));
        assert_eq!(delta.status_2xx, 0);
        assert_eq!(delta.host_requests.get("api.storyblok.com"), Some(&1));
        assert_eq!(delta.host_requests.get("mapi.storyblok.com"), Some(&1));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let metrics = Metrics::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        metrics.inc_request("api.storyblok.com", &Method::GET);
                        metrics.inc_status(200);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("worker should not panic");
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4000);
        assert_eq!(snapshot.status_2xx, 4000);
        assert_eq!(snapshot.host_requests.get("api.storyblok.com"), Some(&4000));
    }

    #[test]
    fn global_instance_is_shared() {
        let first = Metrics::global();
        let second = Metrics::global();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }
}
