//! Crate-wide error taxonomy: a single `#[non_exhaustive]` enum with one
//! variant per failure domain, a hand-written `Display`, and an `other()`
//! escape hatch for opaque boxed errors.

use std::fmt;
use std::io;

/// A type-erased error, for failures this crate does not want to name.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while driving any of the three protocol state machines.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The underlying transport failed or closed unexpectedly.
    Io(io::Error),
    /// An HTTP/1 request/response framing violation.
    Http1(Http1Error),
    /// An HTTP/2 connection- or stream-level protocol violation.
    Http2(Http2Error),
    /// A WebSocket framing or handshake violation.
    WebSocket(WsError),
    /// An HPACK decode/encode failure.
    Hpack(String),
    /// The user handler returned an error or panicked.
    Handler(BoxedError),
    /// Any other error not worth a dedicated variant.
    Other(BoxedError),
}

impl Error {
    /// Wraps an arbitrary error as [`Error::Other`].
    pub fn other(err: impl Into<BoxedError>) -> Self {
        Self::Other(err.into())
    }

    /// Wraps a handler failure as [`Error::Handler`].
    pub fn handler(err: impl Into<BoxedError>) -> Self {
        Self::Handler(err.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "transport error: {e}"),
            Self::Http1(e) => write!(f, "http/1 error: {e}"),
            Self::Http2(e) => write!(f, "http/2 error: {e}"),
            Self::WebSocket(e) => write!(f, "websocket error: {e}"),
            Self::Hpack(msg) => write!(f, "hpack error: {msg}"),
            Self::Handler(e) => write!(f, "handler error: {e}"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<Http1Error> for Error {
    fn from(e: Http1Error) -> Self {
        Self::Http1(e)
    }
}
impl From<Http2Error> for Error {
    fn from(e: Http2Error) -> Self {
        Self::Http2(e)
    }
}
impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Self::WebSocket(e)
    }
}
impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Self::Http1(Http1Error::Malformed(e.to_string()))
    }
}

/// HTTP/1 request/response framing errors, each mapped to a status by #[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Http1Error {
    /// Request line exceeded `max_request_line_length` → 414.
    #[error("request-uri too long")]
    UriTooLong,
    /// Header block exceeded `max_header_length`/`max_header_count` → 431.
    #[error("request header fields too large")]
    HeaderFieldsTooLarge,
    /// Request line or headers did not parse → 400.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Both `content-length` and `transfer-encoding` present → 400.
    #[error("ambiguous request framing: both content-length and transfer-encoding set")]
    AmbiguousFraming,
    /// `transfer-encoding` present a value other than `chunked` → 400.
    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),
    /// More bytes arrived for a content-length body than declared.
    #[error("request smuggling: body exceeded declared content-length")]
    BodyOverrun,
    /// No further bytes arrived before the deadline → 408.
    #[error("read timeout")]
    ReadTimeout,
    /// The peer closed the connection cleanly before a new request started.
    #[error("connection closed")]
    ConnectionClosed,
}

/// HTTP/2 connection- and stream-level errors (RFC 9113 error codes).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Http2ErrorCode {
    #[error("NO_ERROR")]
    NoError = 0x0,
    #[error("PROTOCOL_ERROR")]
    ProtocolError = 0x1,
    #[error("INTERNAL_ERROR")]
    InternalError = 0x2,
    #[error("FLOW_CONTROL_ERROR")]
    FlowControlError = 0x3,
    #[error("SETTINGS_TIMEOUT")]
    SettingsTimeout = 0x4,
    #[error("STREAM_CLOSED")]
    StreamClosed = 0x5,
    #[error("FRAME_SIZE_ERROR")]
    FrameSizeError = 0x6,
    #[error("REFUSED_STREAM")]
    RefusedStream = 0x7,
    #[error("CANCEL")]
    Cancel = 0x8,
    #[error("COMPRESSION_ERROR")]
    CompressionError = 0x9,
    #[error("CONNECT_ERROR")]
    ConnectError = 0xa,
    #[error("ENHANCE_YOUR_CALM")]
    EnhanceYourCalm = 0xb,
    #[error("INADEQUATE_SECURITY")]
    InadequateSecurity = 0xc,
    #[error("HTTP_1_1_REQUIRED")]
    Http11Required = 0xd,
}

impl Http2ErrorCode {
    /// Numeric wire value of the error code, per RFC 9113.
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A classified HTTP/2 error: either connection-fatal (GOAWAY) or
/// stream-scoped (RST_STREAM).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Http2Error {
    /// Connection-level error; the connection must send GOAWAY and close.
    #[error("connection error: {code}: {debug}")]
    Connection {
        code: Http2ErrorCode,
        debug: String,
    },
    /// Stream-level error; RST_STREAM is sent and only that stream dies.
    #[error("stream {stream_id} error: {code}")]
    Stream {
        stream_id: u32,
        code: Http2ErrorCode,
    },
}

impl Http2Error {
    /// Builds a connection-fatal error.
    pub fn connection(code: Http2ErrorCode, debug: impl Into<String>) -> Self {
        Self::Connection {
            code,
            debug: debug.into(),
        }
    }

    /// Builds a stream-scoped error.
    #[must_use]
    pub fn stream(stream_id: u32, code: Http2ErrorCode) -> Self {
        Self::Stream { stream_id, code }
    }
}

/// WebSocket protocol errors, each carrying the close code mandates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WsError {
    #[error("protocol error (close 1002): {0}")]
    Protocol(String),
    #[error("message too big (close 1009)")]
    MessageTooBig,
    #[error("invalid payload data (close 1007): {0}")]
    InvalidPayload(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("abnormal closure (close 1006)")]
    AbnormalClosure,
}

impl WsError {
    /// The close code this error maps to,.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 1002,
            Self::MessageTooBig => 1009,
            Self::InvalidPayload(_) => 1007,
            Self::Handshake(_) => 1002,
            Self::AbnormalClosure => 1006,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wraps_inner_message() {
        let err = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"));
        assert!(err.to_string().contains("pipe gone"));
    }

    #[test]
    fn ws_error_close_codes_match_spec() {
        assert_eq!(WsError::MessageTooBig.close_code(), 1009);
        assert_eq!(WsError::InvalidPayload(String::new()).close_code(), 1007);
        assert_eq!(WsError::AbnormalClosure.close_code(), 1006);
    }

    #[test]
    fn http2_error_code_numeric_values() {
        assert_eq!(Http2ErrorCode::NoError.code(), 0);
        assert_eq!(Http2ErrorCode::FlowControlError.code(), 3);
        assert_eq!(Http2ErrorCode::Http11Required.code(), 0xd);
    }
}
