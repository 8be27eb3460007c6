use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use http::request::Parts;

use crate::body::{RequestBody, ResponseBody};
use crate::error::{Error, TransportError, TransportErrorKind, io_error_kind};
use crate::transport::{Request, Response, RoundTrip};

/// Blocking network delegate backed by a pooled `ureq::Agent`.
///
/// Every status is returned as a response; only connection, TLS, timeout and
/// body read failures become errors.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Caps each exchange, including reading the body.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    pub fn from_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    fn build(timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();
        Self {
            agent: config.new_agent(),
        }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        parts: &Parts,
        body: S,
    ) -> Result<Result<http::Response<ureq::Body>, ureq::Error>, Error> {
        let mut builder = http::Request::builder()
            .method(parts.method.clone())
            .uri(parts.uri.clone());
        for (name, value) in &parts.headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(body)
            .map_err(|source| Error::RequestBuild { source })?;
        Ok(self.agent.run(request))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTrip for UreqTransport {
    fn round_trip(&self, request: Request) -> Result<Response, Error> {
        let (parts, body) = request.into_parts();
        let uri_text = parts.uri.to_string();
        if parts.uri.scheme().is_none() || parts.uri.host().is_none() {
            return Err(Error::InvalidUri { uri: uri_text });
        }

        let outcome = match body {
            RequestBody::Empty => self.run(&parts, ())?,
            RequestBody::Bytes(bytes) => self.run(&parts, bytes.to_vec())?,
            RequestBody::Reader(reader) => {
                self.run(&parts, ureq::SendBody::from_owned_reader(reader))?
            }
            RequestBody::Replayable(factory) => {
                let reader = (*factory)().map_err(|source| Error::BufferBody {
                    method: parts.method.clone(),
                    uri: uri_text.clone(),
                    source,
                })?;
                self.run(&parts, ureq::SendBody::from_owned_reader(reader))?
            }
        };

        let mut response = outcome.map_err(|source| {
            Error::transport(
                &parts.method,
                &uri_text,
                TransportError::new(classify_ureq_error(&source), source),
            )
        })?;

        let body = read_body(&mut response)
            .map_err(|source| Error::transport(&parts.method, &uri_text, source.into()))?;
        let (response_parts, _) = response.into_parts();
        Ok(http::Response::from_parts(
            response_parts,
            ResponseBody::from_bytes(body),
        ))
    }
}

fn read_body(response: &mut http::Response<ureq::Body>) -> std::io::Result<Bytes> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    reader.read_to_end(&mut collected)?;
    Ok(Bytes::from(collected))
}

pub(crate) fn classify_ureq_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => io_error_kind(source.kind()),
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::{UreqTransport, classify_ureq_error};
    use crate::body::RequestBody;
    use crate::error::{ErrorCode, TransportErrorKind};
    use crate::transport::RoundTrip;

    #[test]
    fn relative_uri_is_rejected_before_connecting() {
        let request = http::Request::get("/v1/spaces")
            .body(RequestBody::Empty)
            .expect("request should build");
        let error = UreqTransport::new()
            .round_trip(request)
            .expect_err("relative uri has no host");
        assert_eq!(error.code(), ErrorCode::InvalidUri);
    }

    #[test]
    fn ureq_errors_map_to_transport_kinds() {
        assert_eq!(
            classify_ureq_error(&ureq::Error::HostNotFound),
            TransportErrorKind::Dns
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::ConnectionFailed),
            TransportErrorKind::Connect
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "stalled",
            ))),
            TransportErrorKind::Timeout
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))),
            TransportErrorKind::Read
        );
    }
}
