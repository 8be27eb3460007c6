use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use tracing::{debug, warn};

use crate::body::{ReplayBody, RequestBody, ResponseBody};
use crate::context::{Context, sleep_with_context};
use crate::counters::{RetryCause, RetryCounters, record_retry};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::options::TransportOptions;
use crate::rate_limit::TokenBucket;
use crate::retry::{backoff_delay, is_retryable_status, parse_retry_after};
use crate::util::{host_key, lock_unpoisoned};

pub type Request = http::Request<RequestBody>;
pub type Response = http::Response<ResponseBody>;

const SUCCESS_RPS_STEP: f64 = 0.02;
const STATUS_RETRY_RPS_STEP: f64 = -0.2;
const RETRY_AFTER_RPS_STEP: f64 = -0.3;
const NETWORK_RETRY_RPS_STEP: f64 = -0.1;

/// A single blocking HTTP exchange.
///
/// Network-level failures come back as [`Error::Transport`]; any response the
/// server produced, whatever its status, comes back as `Ok`.
pub trait RoundTrip: Send + Sync {
    fn round_trip(&self, request: Request) -> Result<Response, Error>;
}

impl<T: RoundTrip + ?Sized> RoundTrip for &T {
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        (**self).round_trip(request)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        (**self).round_trip(request)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Box<T> {
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        (**self).round_trip(request)
    }
}

/// Adapter turning a closure into a [`RoundTrip`].
pub struct RoundTripFn<F>(F);

pub fn round_trip_fn<F>(handler: F) -> RoundTripFn<F>
where
    F: Fn(Request) -> Result<Response, Error> + Send + Sync,
{
    RoundTripFn(handler)
}

impl<F> RoundTrip for RoundTripFn<F>
where
    F: Fn(Request) -> Result<Response, Error> + Send + Sync,
{
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        (self.0)(request)
    }
}

/// Wraps a network delegate with per-host pacing, adaptive rate control and
/// retries.
///
/// Safe to share between threads; all waiting happens on the calling thread.
pub struct RetryingLimiterTransport<T> {
    inner: T,
    options: TransportOptions,
    buckets: Mutex<BTreeMap<String, Arc<TokenBucket>>>,
}

impl<T> std::fmt::Debug for RetryingLimiterTransport<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hosts: Vec<String> = lock_unpoisoned(&self.buckets).keys().cloned().collect();
        formatter
            .debug_struct("RetryingLimiterTransport")
            .field("options", &self.options)
            .field("hosts", &hosts)
            .finish_non_exhaustive()
    }
}

struct RetryPlan {
    delay: Duration,
    rps_step: f64,
    cause: RetryCause,
}

impl<T: RoundTrip> RetryingLimiterTransport<T> {
    pub fn new(inner: T, options: TransportOptions) -> Self {
        Self {
            inner,
            options,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Metrics {
        self.options.configured_metrics()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Bucket for `host`, created on first use and kept for the transport's
    /// lifetime.
    pub fn bucket_for(&self, host: &str) -> Arc<TokenBucket> {
        let host = host.to_ascii_lowercase();
        let mut buckets = lock_unpoisoned(&self.buckets);
        let bucket = buckets.entry(host).or_insert_with_key(|host| {
            let limit = self.options.limit_for(host);
            debug!(host = %host, rps = limit.rps, burst = limit.burst, "creating host rate limiter");
            Arc::new(TokenBucket::with_poll_slice(
                limit,
                Arc::clone(self.options.configured_clock()),
                self.options.configured_poll_slice(),
            ))
        });
        Arc::clone(bucket)
    }

    pub fn round_trip(&self, request: Request) -> Result<Response, Error> {
        self.execute(request)
    }

    fn execute(&self, request: Request) -> Result<Response, Error> {
        let clock = self.options.configured_clock();
        let context = Context::from_extensions(request.extensions())
            .cloned()
            .unwrap_or_default();
        context.check(clock.now())?;
        let counters = RetryCounters::from_extensions(request.extensions()).cloned();

        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let uri_text = parts.uri.to_string();
        let mut replay =
            ReplayBody::prepare(&method, body).map_err(|source| Error::BufferBody {
                method: method.clone(),
                uri: uri_text.clone(),
                source,
            })?;

        let host = host_key(&parts.uri);
        let bucket = self.bucket_for(&host);
        let metrics = self.options.configured_metrics();
        metrics.inc_request(&host, &method);

        let max_attempts = self.options.configured_retry_max().saturating_add(1);
        let mut attempt = 0_usize;

        // Every other outcome returns from inside the loop.
        let exhausted = loop {
            let has_retry_budget = attempt + 1 < max_attempts;
            bucket.wait(&context)?;

            let body = replay.materialize().map_err(|source| Error::BufferBody {
                method: method.clone(),
                uri: uri_text.clone(),
                source,
            })?;
            let mut attempt_request = http::Request::new(body);
            *attempt_request.method_mut() = method.clone();
            *attempt_request.uri_mut() = parts.uri.clone();
            *attempt_request.version_mut() = parts.version;
            *attempt_request.headers_mut() = parts.headers.clone();
            *attempt_request.extensions_mut() = parts.extensions.clone();

            let plan = match self.inner.round_trip(attempt_request) {
                Err(error) => {
                    if !error.is_transient() {
                        return Err(error);
                    }
                    if !has_retry_budget {
                        break error;
                    }
                    debug!(host = %host, method = %method, attempt, error = %error, "retrying transient network error");
                    RetryPlan {
                        delay: self.exponential_backoff(attempt),
                        rps_step: NETWORK_RETRY_RPS_STEP,
                        cause: RetryCause::Network,
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    metrics.inc_status(status.as_u16());
                    if status.is_success() {
                        self.nudge(&bucket, SUCCESS_RPS_STEP);
                    }
                    if !is_retryable_status(status) {
                        return Ok(response);
                    }
                    if !has_retry_budget {
                        warn!(host = %host, method = %method, status = status.as_u16(), attempts = attempt + 1, "retry budget exhausted");
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers(), clock.wall_now());
                    drop(response);
                    let plan = self.status_retry_plan(status, retry_after, attempt);
                    debug!(
                        host = %host,
                        method = %method,
                        status = status.as_u16(),
                        attempt,
                        delay_ms = plan.delay.as_millis() as u64,
                        retry_after = retry_after.is_some(),
                        "retrying throttled or unavailable response"
                    );
                    plan
                }
            };

            self.nudge(&bucket, plan.rps_step);
            metrics.inc_retry();
            record_retry(counters.as_ref(), plan.cause);
            self.sleep_backoff(&context, plan.delay)?;
            attempt += 1;
        };

        warn!(host = %host, method = %method, attempts = max_attempts, error = %exhausted, "retry budget exhausted");
        Err(exhausted)
    }

    fn status_retry_plan(
        &self,
        status: StatusCode,
        retry_after: Option<Duration>,
        attempt: usize,
    ) -> RetryPlan {
        let cause = if status == StatusCode::TOO_MANY_REQUESTS {
            RetryCause::Status429
        } else {
            RetryCause::Status5xx
        };
        match retry_after {
            Some(delay) => RetryPlan {
                delay: delay.min(self.options.configured_backoff_cap()),
                rps_step: RETRY_AFTER_RPS_STEP,
                cause,
            },
            None => RetryPlan {
                delay: self.exponential_backoff(attempt),
                rps_step: STATUS_RETRY_RPS_STEP,
                cause,
            },
        }
    }

    fn exponential_backoff(&self, attempt: usize) -> Duration {
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        backoff_delay(
            self.options.configured_backoff_base(),
            self.options.configured_backoff_cap(),
            attempt,
            self.options.configured_jitter().as_ref(),
        )
    }

    fn nudge(&self, bucket: &TokenBucket, step: f64) {
        let ceiling = bucket.max_rps();
        let floor = self.options.configured_min_rps().min(ceiling);
        bucket.adjust_rps(step, floor, ceiling);
    }

    fn sleep_backoff(&self, context: &Context, delay: Duration) -> Result<(), Error> {
        let metrics = self.options.configured_metrics();
        match sleep_with_context(
            self.options.configured_clock().as_ref(),
            context,
            delay,
            self.options.configured_poll_slice(),
        ) {
            Ok(slept) => {
                metrics.add_backoff(slept);
                Ok(())
            }
            Err((error, slept)) => {
                metrics.add_backoff(slept);
                Err(error.into())
            }
        }
    }
}

impl<T: RoundTrip> RoundTrip for RetryingLimiterTransport<T> {
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        self.execute(request)
    }
}
