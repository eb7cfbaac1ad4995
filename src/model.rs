//! The protocol-agnostic Request/Response/Body data model shared by the
//! HTTP/1 and HTTP/2 drivers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, Method, StatusCode, Version};

/// An ordered list of lowercased-name/value header pairs; duplicates are
/// preserved verbatim.
pub type HeaderList = Vec<(String, String)>;

/// The inbound body reader handed to a handler. Each protocol driver supplies
/// its own implementation (content-length/chunked for HTTP/1, a per-stream
/// inbound queue for HTTP/2); the handler only sees this trait.
///
/// A body may be read at most once. Implementations return an empty read
/// after the body has been fully consumed or closed rather than erroring.
#[async_trait::async_trait]
pub trait BodyReader: Send {
    /// Reads the next chunk of body bytes. Returns `None` once the body is
    /// exhausted.
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>>;

    /// Reads and concatenates the entire remaining body.
    async fn read_to_end(&mut self) -> crate::Result<Bytes> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buf))
    }
}

/// A body that has already been fully buffered (used in tests and by callers
/// that have an in-memory payload ready).
pub struct BufferedBody {
    remaining: Option<Bytes>,
}

impl BufferedBody {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            remaining: Some(data.into()),
        }
    }
}

#[async_trait::async_trait]
impl BodyReader for BufferedBody {
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        Ok(self.remaining.take().filter(|b| !b.is_empty()))
    }
}

/// A fully parsed HTTP request, immutable after headers are read.
pub struct Request {
    pub method: Method,
    pub target: String,
    pub scheme: String,
    pub authority: Option<String>,
    pub headers: HeaderList,
    pub version: Version,
    pub peer_addr: Option<SocketAddr>,
    body: Option<Box<dyn BodyReader>>,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            target: target.into(),
            scheme: "http".into(),
            authority: None,
            headers: Vec::new(),
            version,
            peer_addr: None,
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl BodyReader + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    /// Looks up the first header matching `name`, case-insensitively (names
    /// are already stored lowercased, but callers may pass mixed case).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for headers matching `name`, in original order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Takes the body reader, leaving `None` behind. A second call returns a
    /// reader that yields no chunks.
    pub fn take_body(&mut self) -> Box<dyn BodyReader> {
        self.body
            .take()
            .unwrap_or_else(|| Box::new(BufferedBody::new(Bytes::new())))
    }
}

/// The response body the user handler produces: inline bytes, a file range,
/// or a chunked stream.
#[non_exhaustive]
pub enum Body {
    /// No body at all (distinct from `Inline(empty)` so HEAD/204/304 framing
    /// can omit `content-length` entirely where a response must not carry a
    /// body).
    None,
    /// A single buffered payload.
    Inline(Bytes),
    /// A `sendfile`-eligible file range: `{path, offset, length}`.
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// A chunked stream of body fragments, produced lazily.
    Chunked(Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send>>),
}

impl Body {
    #[must_use]
    pub fn empty() -> Self {
        Self::None
    }

    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Inline(data.into())
    }

    #[must_use]
    pub fn file(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self::File {
            path: path.into(),
            offset,
            length,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The known total length, if determinable without reading the body.
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        match self {
            Self::None => Some(0),
            Self::Inline(b) => Some(b.len() as u64),
            Self::File { length, .. } => Some(*length),
            Self::Chunked(_) => None,
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("Body::None"),
            Self::Inline(b) => f.debug_tuple("Body::Inline").field(&b.len()).finish(),
            Self::File {
                path,
                offset,
                length,
            } => f
                .debug_struct("Body::File")
                .field("path", path)
                .field("offset", offset)
                .field("length", length)
                .finish(),
            Self::Chunked(_) => f.write_str("Body::Chunked(..)"),
        }
    }
}

/// The response a handler produces: `{status, headers, body}`.
#[non_exhaustive]
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Set by a handler to explicitly request compression of a file body,
    /// overriding the "never compress file ranges unless requested" default.
    pub force_compress_file: bool,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::None,
            force_compress_file: false,
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(v) = http::HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }
}
