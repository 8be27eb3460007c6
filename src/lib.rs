//! `hostpace` is a blocking HTTP transport for API SDKs that paces requests
//! per host, adapts its rate to server pushback and retries throttled or
//! unavailable responses.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use hostpace::prelude::{
//!     Context, RequestBody, RetryCounters, RetryingLimiterTransport, TransportOptions,
//!     UreqTransport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = RetryingLimiterTransport::new(
//!         UreqTransport::with_timeout(Duration::from_secs(30)),
//!         TransportOptions::from_env(),
//!     );
//!
//!     let counters = RetryCounters::new();
//!     let mut request = http::Request::get("https://mapi.storyblok.com/v1/spaces/1/stories")
//!         .body(RequestBody::Empty)?;
//!     Context::new()
//!         .with_timeout(transport.options().configured_clock().as_ref(), Duration::from_secs(60))
//!         .attach(&mut request);
//!     counters.attach(&mut request);
//!
//!     let response = transport.round_trip(request)?;
//!     println!("status={} retries={}", response.status(), counters.total());
//!     println!("{}", transport.metrics().snapshot());
//!     Ok(())
//! }
//! ```
//!
//! # Defaults
//!
//! - `mapi.storyblok.com` is paced at 14 rps with a burst of 14, overridable
//!   through `SB_MA_RPS` and `SB_MA_BURST`.
//! - `api.storyblok.com` is paced at 20 rps, any other host at 10 rps.
//! - Up to 4 retries with 250ms base backoff capped at 5s
//!   (`SB_MA_RETRY_MAX`, `SB_MA_RETRY_BASE_MS`, `SB_MA_RETRY_CAP_MS`).

mod body;
mod clock;
mod context;
mod counters;
mod error;
mod metrics;
mod options;
mod rate_limit;
mod retry;
mod transport;
mod ureq_transport;
mod util;

pub use crate::body::{BodyFactory, RequestBody, ResponseBody};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::context::Context;
pub use crate::counters::{RetryCounters, RetryCountersSnapshot};
pub use crate::error::{
    BoxError, ContextError, Error, ErrorCode, TransportError, TransportErrorKind,
};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use crate::options::{
    CONTENT_DELIVERY_HOST, ENV_BURST, ENV_RETRY_BASE_MS, ENV_RETRY_CAP_MS, ENV_RETRY_MAX, ENV_RPS,
    MANAGEMENT_API_HOST, TransportOptions,
};
pub use crate::rate_limit::{DEFAULT_POLL_SLICE, Limit, TokenBucket};
pub use crate::retry::{
    JitterFn, RETRYABLE_STATUS_CODES, backoff_delay, full_jitter, is_retryable_status, no_jitter,
    parse_retry_after,
};
pub use crate::transport::{
    Request, Response, RetryingLimiterTransport, RoundTrip, RoundTripFn, round_trip_fn,
};
pub use crate::ureq_transport::UreqTransport;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Clock, Context, Error, ErrorCode, Limit, ManualClock, Metrics, MetricsSnapshot, Request,
        RequestBody, Response, ResponseBody, RetryCounters, RetryCountersSnapshot,
        RetryingLimiterTransport, RoundTrip, SystemClock, TransportError, TransportErrorKind,
        TransportOptions, UreqTransport,
    };
}
