use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const TRANSIENT_MESSAGE_MARKERS: [&str; 4] = ["timeout", "timed out", "temporary", "transient"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Temporary,
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Temporary => "temporary",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure reported by a network delegate before any response was produced.
#[derive(Debug, Error)]
#[error("{kind} transport failure: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn timeout(source: impl Into<BoxError>) -> Self {
        Self::new(TransportErrorKind::Timeout, source)
    }

    pub fn temporary(source: impl Into<BoxError>) -> Self {
        Self::new(TransportErrorKind::Temporary, source)
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Timeouts and errors explicitly marked temporary are transient, as is
    /// anything whose message mentions a timeout or a temporary condition.
    pub fn is_transient(&self) -> bool {
        if matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Temporary
        ) {
            return true;
        }
        let text = self.source.to_string().to_ascii_lowercase();
        TRANSIENT_MESSAGE_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(source: std::io::Error) -> Self {
        Self::new(io_error_kind(source.kind()), source)
    }
}

pub(crate) fn io_error_kind(kind: std::io::ErrorKind) -> TransportErrorKind {
    match kind {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        std::io::ErrorKind::Interrupted => TransportErrorKind::Temporary,
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Cancelled,
    DeadlineExceeded,
    Transport,
    BufferBody,
    InvalidUri,
    RequestBuild,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Transport => "transport",
            Self::BufferBody => "buffer_body",
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to buffer request body for {method} {uri}: {source}")]
    BufferBody {
        method: Method,
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::BufferBody { .. } => ErrorCode::BufferBody,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
        }
    }

    /// Wraps a delegate failure with the request it belongs to.
    pub fn transport(method: &Method, uri: &str, source: TransportError) -> Self {
        Self::Transport {
            kind: source.kind(),
            method: method.clone(),
            uri: uri.to_owned(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<ContextError> for Error {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TransportError, TransportErrorKind};

    #[test]
    fn timeout_and_temporary_kinds_are_transient() {
        assert!(TransportError::timeout("deadline elapsed").is_transient());
        assert!(TransportError::temporary("try again").is_transient());
    }

    #[test]
    fn message_markers_make_other_errors_transient() {
        let error = TransportError::new(
            TransportErrorKind::Other,
            "upstream reported a Transient condition",
        );
        assert!(error.is_transient());

        let error = TransportError::new(TransportErrorKind::Connect, "connection refused");
        assert!(!error.is_transient());
    }

    #[test]
    fn io_timeouts_map_to_timeout_kind() {
        let error = TransportError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read stalled",
        ));
        assert_eq!(error.kind(), TransportErrorKind::Timeout);
        assert!(error.is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        let error = Error::transport(
            &http::Method::GET,
            "https://api.storyblok.com/v2/cdn/stories",
            TransportError::timeout("slow"),
        );
        assert_eq!(error.code(), ErrorCode::Transport);
        assert_eq!(error.code().as_str(), "transport");
        assert!(error.is_transient());
        assert!(Error::Cancelled.is_cancellation());
    }
}
