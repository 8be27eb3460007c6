use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::metrics::Metrics;
use crate::rate_limit::{DEFAULT_POLL_SLICE, Limit};
use crate::retry::{JitterFn, full_jitter, no_jitter};

/// High-write-volume management API.
pub const MANAGEMENT_API_HOST: &str = "mapi.storyblok.com";
/// Read-heavy content delivery API.
pub const CONTENT_DELIVERY_HOST: &str = "api.storyblok.com";

pub const ENV_RPS: &str = "SB_MA_RPS";
pub const ENV_BURST: &str = "SB_MA_BURST";
pub const ENV_RETRY_MAX: &str = "SB_MA_RETRY_MAX";
pub const ENV_RETRY_BASE_MS: &str = "SB_MA_RETRY_BASE_MS";
pub const ENV_RETRY_CAP_MS: &str = "SB_MA_RETRY_CAP_MS";

const DEFAULT_MANAGEMENT_LIMIT: Limit = Limit::new(14.0, 14);
const DEFAULT_CONTENT_DELIVERY_LIMIT: Limit = Limit::new(20.0, 20);
const DEFAULT_RETRY_MAX: usize = 4;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(5000);
const DEFAULT_MIN_RPS: f64 = 1.0;

/// Immutable configuration shared by every request through one transport.
#[derive(Clone)]
pub struct TransportOptions {
    retry_max: usize,
    backoff_base: Duration,
    backoff_cap: Duration,
    jitter: JitterFn,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    host_limits: BTreeMap<String, Limit>,
    default_limit: Limit,
    min_rps: f64,
    poll_slice: Duration,
}

impl std::fmt::Debug for TransportOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportOptions")
            .field("retry_max", &self.retry_max)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_cap", &self.backoff_cap)
            .field("clock", &self.clock)
            .field("host_limits", &self.host_limits)
            .field("default_limit", &self.default_limit)
            .field("min_rps", &self.min_rps)
            .field("poll_slice", &self.poll_slice)
            .finish()
    }
}

impl TransportOptions {
    /// Built-in defaults, ignoring the environment.
    pub fn standard() -> Self {
        let host_limits = [
            (MANAGEMENT_API_HOST.to_owned(), DEFAULT_MANAGEMENT_LIMIT),
            (CONTENT_DELIVERY_HOST.to_owned(), DEFAULT_CONTENT_DELIVERY_LIMIT),
        ]
        .into_iter()
        .collect();

        Self {
            retry_max: DEFAULT_RETRY_MAX,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            jitter: Arc::new(full_jitter),
            clock: Arc::new(SystemClock),
            metrics: Metrics::global().clone(),
            host_limits,
            default_limit: Limit::default(),
            min_rps: DEFAULT_MIN_RPS,
            poll_slice: DEFAULT_POLL_SLICE,
        }
    }

    /// Defaults with the `SB_MA_*` overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::standard();

        let mut management = DEFAULT_MANAGEMENT_LIMIT;
        if let Some(rps) = read_var(&lookup, ENV_RPS, |rps: &f64| rps.is_finite() && *rps > 0.0) {
            management.rps = rps;
        }
        if let Some(burst) = read_var(&lookup, ENV_BURST, |burst: &u32| *burst > 0) {
            management.burst = burst;
        }
        options = options.host_limit(MANAGEMENT_API_HOST, management);

        if let Some(retry_max) = read_var(&lookup, ENV_RETRY_MAX, |_: &usize| true) {
            options = options.retry_max(retry_max);
        }
        if let Some(base_ms) = read_var(&lookup, ENV_RETRY_BASE_MS, |ms: &u64| *ms > 0) {
            options.backoff_base = Duration::from_millis(base_ms);
        }
        if let Some(cap_ms) = read_var(&lookup, ENV_RETRY_CAP_MS, |ms: &u64| *ms > 0) {
            options.backoff_cap = Duration::from_millis(cap_ms);
        }
        options.backoff_cap = options.backoff_cap.max(options.backoff_base);
        options
    }

    /// Retries after the first attempt.
    pub fn retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        if self.backoff_cap < self.backoff_base {
            self.backoff_cap = self.backoff_base;
        }
        self
    }

    pub fn backoff_cap(mut self, backoff_cap: Duration) -> Self {
        self.backoff_cap = backoff_cap.max(self.backoff_base);
        self
    }

    pub fn jitter(
        mut self,
        jitter: impl Fn(Duration, u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(no_jitter)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn host_limit(mut self, host: impl Into<String>, limit: Limit) -> Self {
        let host = host.into().to_ascii_lowercase();
        self.host_limits.insert(host, limit.normalize());
        self
    }

    /// Limit for hosts without an explicit entry.
    pub fn default_limit(mut self, limit: Limit) -> Self {
        self.default_limit = limit.normalize();
        self
    }

    /// Floor for adaptive rate decreases.
    pub fn min_rps(mut self, min_rps: f64) -> Self {
        if min_rps.is_finite() && min_rps > 0.0 {
            self.min_rps = min_rps;
        }
        self
    }

    pub fn poll_slice(mut self, poll_slice: Duration) -> Self {
        self.poll_slice = poll_slice.max(Duration::from_micros(1));
        self
    }

    pub fn configured_retry_max(&self) -> usize {
        self.retry_max
    }

    pub fn configured_backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn configured_backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    pub fn configured_metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn configured_clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn limit_for(&self, host: &str) -> Limit {
        self.host_limits
            .get(host)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub(crate) fn configured_jitter(&self) -> &JitterFn {
        &self.jitter
    }

    pub(crate) fn configured_min_rps(&self) -> f64 {
        self.min_rps
    }

    pub(crate) fn configured_poll_slice(&self) -> Duration {
        self.poll_slice
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::standard()
    }
}

fn read_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    valid: impl Fn(&T) -> bool,
) -> Option<T> {
    let raw = lookup(name)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "ignoring invalid transport setting");
            None
        }
    }
}
