use std::time::Duration;

use hostpace::CONTENT_DELIVERY_HOST;
use hostpace::prelude::{
    Context, RequestBody, RetryCounters, RetryingLimiterTransport, TransportOptions, UreqTransport,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SB_MA_RPS, SB_MA_BURST and SB_MA_RETRY_* override the defaults.
    let options = TransportOptions::from_env();
    let limit = options.limit_for(CONTENT_DELIVERY_HOST);
    println!(
        "pacing {CONTENT_DELIVERY_HOST}: rps={} burst={} retry_max={}",
        limit.rps,
        limit.burst,
        options.configured_retry_max()
    );

    let transport =
        RetryingLimiterTransport::new(UreqTransport::with_timeout(Duration::from_secs(10)), options);
    let before = transport.metrics().snapshot();

    for story in ["home", "about", "contact"] {
        let counters = RetryCounters::new();
        let mut request = http::Request::get(format!(
            "https://{CONTENT_DELIVERY_HOST}/v2/cdn/stories/{story}?version=published"
        ))
        .body(RequestBody::Empty)?;
        Context::new()
            .with_timeout(
                transport.options().configured_clock().as_ref(),
                Duration::from_secs(30),
            )
            .attach(&mut request);
        counters.attach(&mut request);

        match transport.round_trip(request) {
            Ok(response) => println!("{story}: status={}", response.status()),
            Err(error) => println!("{story}: error={} ({error})", error.code().as_str()),
        }
        println!("{story}: retries={:?}", counters.snapshot());
    }

    let delta = transport.metrics().snapshot().since(&before);
    println!("{delta}");
    println!("host_requests={:?}", delta.host_requests);
    Ok(())
}
