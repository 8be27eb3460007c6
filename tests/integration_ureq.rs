use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostpace::{
    Error, ErrorCode, Metrics, RequestBody, RetryCounters, RetryingLimiterTransport, RoundTrip,
    TransportOptions, UreqTransport,
};
use http::StatusCode;

struct Reply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static [u8],
}

impl Reply {
    fn new(status: u16, body: &'static [u8]) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

#[derive(Clone, Debug)]
struct Received {
    method: String,
    target: String,
    accept: Option<String>,
    body: Vec<u8>,
}

/// Serves one scripted reply per connection, in order, then stops accepting.
struct StubServer {
    base_url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl StubServer {
    fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let address = listener.local_addr().expect("read stub address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        std::thread::spawn(move || {
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                // Logged before the reply is written.
                let _ = exchange(stream, &reply, |request| {
                    log.lock().expect("lock received requests").push(request);
                });
            }
        });

        Self {
            base_url: format!("http://{address}"),
            received,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn received(&self) -> Vec<Received> {
        self.received
            .lock()
            .expect("lock received requests")
            .clone()
    }
}

fn exchange(
    stream: TcpStream,
    reply: &Reply,
    record: impl FnOnce(Received),
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut words = request_line.split_whitespace();
    let method = words.next().unwrap_or_default().to_owned();
    let target = words.next().unwrap_or_default().to_owned();

    let mut accept = None;
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("accept") {
            accept = Some(value.to_owned());
        }
    }
    let mut body = vec![0_u8; content_length];
    reader.read_exact(&mut body)?;
    record(Received {
        method,
        target,
        accept,
        body,
    });

    let reason = StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("");
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    )?;
    for (name, value) in &reply.headers {
        write!(stream, "{name}: {value}\r\n")?;
    }
    stream.write_all(b"\r\n")?;
    stream.write_all(reply.body)?;
    stream.flush()
}

fn transport() -> RetryingLimiterTransport<UreqTransport> {
    RetryingLimiterTransport::new(
        UreqTransport::with_timeout(Duration::from_secs(2)),
        TransportOptions::standard()
            .metrics(Metrics::new())
            .backoff_base(Duration::from_millis(10))
            .backoff_cap(Duration::from_millis(50)),
    )
}

#[test]
fn get_returns_status_headers_and_body() {
    let server = StubServer::start(vec![
        Reply::new(200, br#"{"stories":[]}"#).header("X-Total", "0"),
    ]);
    let transport = transport();

    let request = http::Request::get(server.url("/v2/cdn/stories?per_page=100"))
        .header("Accept", "application/json")
        .body(RequestBody::Empty)
        .expect("request should build");
    let response = transport.round_trip(request).expect("get should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-total")
            .and_then(|value| value.to_str().ok()),
        Some("0")
    );
    let body = response
        .into_body()
        .read_to_bytes()
        .expect("body should be readable");
    assert_eq!(&body[..], br#"{"stories":[]}"#);

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, "GET");
    assert_eq!(received[0].target, "/v2/cdn/stories?per_page=100");
    assert_eq!(received[0].accept.as_deref(), Some("application/json"));
}

#[test]
fn client_errors_pass_through_without_retry() {
    let server = StubServer::start(vec![Reply::new(404, b"missing")]);
    let transport = transport();

    let request = http::Request::get(server.url("/v1/spaces/1/stories/404"))
        .body(RequestBody::Empty)
        .expect("request should build");
    let response = transport
        .round_trip(request)
        .expect("404 is a response, not an error");

    assert_eq!(response.status(), 404);
    assert_eq!(server.received().len(), 1);
    let snapshot = transport.metrics().snapshot();
    assert_eq!(snapshot.status_4xx, 1);
    assert_eq!(snapshot.total_retries, 0);
}

#[test]
fn post_is_retried_with_the_same_body() {
    let server = StubServer::start(vec![
        Reply::new(503, b"busy"),
        Reply::new(429, b"slow down").header("Retry-After", "0"),
        Reply::new(201, br#"{"story":{"id":7}}"#),
    ]);
    let transport = transport();
    let counters = RetryCounters::new();

    let payload = br#"{"story":{"name":"home"}}"#.to_vec();
    let mut request = http::Request::post(server.url("/v1/spaces/1/stories"))
        .header("Content-Type", "application/json")
        .body(RequestBody::from_reader(std::io::Cursor::new(payload.clone())))
        .expect("request should build");
    counters.attach(&mut request);

    let response = transport.round_trip(request).expect("post should succeed");
    assert_eq!(response.status(), 201);

    let received = server.received();
    assert_eq!(received.len(), 3);
    for request in &received {
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, payload);
    }

    let retries = counters.snapshot();
    assert_eq!(retries.total, 2);
    assert_eq!(retries.status_5xx, 1);
    assert_eq!(retries.status_429, 1);

    let snapshot = transport.metrics().snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.write_requests, 1);
    assert_eq!(snapshot.total_retries, 2);
    assert_eq!(snapshot.status_2xx, 1);
}

#[test]
fn refused_connection_is_a_transport_error() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
        listener.local_addr().expect("read local address")
    };
    let transport = transport();

    let request = http::Request::get(format!("http://{address}/v1/spaces"))
        .body(RequestBody::Empty)
        .expect("request should build");
    let error = transport
        .round_trip(request)
        .expect_err("nothing is listening");

    assert_eq!(error.code(), ErrorCode::Transport);
    assert!(matches!(error, Error::Transport { .. }));
    assert_eq!(transport.metrics().snapshot().total_requests, 1);
}
