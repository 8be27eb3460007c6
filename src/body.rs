use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use http::Method;

/// Produces a fresh reader over the same request payload on every call.
pub type BodyFactory = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// One-shot stream. Buffered before the first attempt for POST/PUT/PATCH.
    Reader(Box<dyn Read + Send>),
    /// Caller-provided replay mechanism; the transport never buffers these.
    Replayable(BodyFactory),
}

impl RequestBody {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub fn replayable(
        factory: impl Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    ) -> Self {
        Self::Replayable(Arc::new(factory))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Reader(_) | Self::Replayable(_) => false,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("RequestBody::Empty"),
            Self::Bytes(bytes) => formatter
                .debug_struct("RequestBody::Bytes")
                .field("len", &bytes.len())
                .finish(),
            Self::Reader(_) => formatter.write_str("RequestBody::Reader(..)"),
            Self::Replayable(_) => formatter.write_str("RequestBody::Replayable(..)"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<()> for RequestBody {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

pub struct ResponseBody {
    reader: Box<dyn Read + Send>,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            reader: Box::new(io::Cursor::new(bytes.into())),
        }
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    pub fn read_to_bytes(mut self) -> io::Result<Bytes> {
        let mut collected = Vec::new();
        self.reader.read_to_end(&mut collected)?;
        Ok(Bytes::from(collected))
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("ResponseBody(..)")
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Request payload in a form that can be handed out once per attempt.
pub(crate) enum ReplayBody {
    Empty,
    Buffered(Bytes),
    Factory(BodyFactory),
    /// Unbuffered stream: only the first attempt carries it.
    Once(Option<Box<dyn Read + Send>>),
}

impl ReplayBody {
    pub(crate) fn prepare(method: &Method, body: RequestBody) -> io::Result<Self> {
        Ok(match body {
            RequestBody::Empty => Self::Empty,
            RequestBody::Bytes(bytes) => Self::Buffered(bytes),
            RequestBody::Replayable(factory) => Self::Factory(factory),
            RequestBody::Reader(mut reader) if is_buffered_method(method) => {
                let mut collected = Vec::new();
                reader.read_to_end(&mut collected)?;
                Self::Buffered(Bytes::from(collected))
            }
            RequestBody::Reader(reader) => Self::Once(Some(reader)),
        })
    }

    pub(crate) fn materialize(&mut self) -> io::Result<RequestBody> {
        Ok(match self {
            Self::Empty => RequestBody::Empty,
            Self::Buffered(bytes) => RequestBody::Bytes(bytes.clone()),
            Self::Factory(factory) => RequestBody::Reader((**factory)()?),
            Self::Once(reader) => reader.take().map_or(RequestBody::Empty, RequestBody::Reader),
        })
    }
}

fn is_buffered_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}
