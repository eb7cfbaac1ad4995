//! The `HttpTransport` abstraction: a polymorphic interface over HTTP/1 and
//! HTTP/2 used by the [`crate::pipeline`], so the pipeline is written once
//! and is generic over either protocol rather than branching on it.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::model::{Body, Request};

/// How a response's body should be framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A body of known length, written with a synthesized `content-length`.
    Raw,
    /// A body of unknown length, written with `transfer-encoding: chunked`
    /// (HTTP/1) or as a plain DATA stream (HTTP/2, which has no chunked
    /// encoding of its own).
    ChunkEncoded,
    /// No body at all (HEAD, 204, 304, ...).
    NoBody,
    /// A 1xx informational response; never touches keep-alive state.
    Inform,
}

/// The per-connection (HTTP/1) or per-stream (HTTP/2) transport used by the
/// pipeline to read one request and write its response. Each concrete
/// protocol driver implements this once; the pipeline never branches on
/// protocol.
#[async_trait::async_trait]
pub trait HttpTransport: Send {
    /// Reads the next request's method/target/headers and returns a
    /// [`Request`] whose body is a lazily-driven [`crate::model::BodyReader`].
    /// Returns `Ok(None)` when the peer has cleanly closed the connection
    /// between requests (not an error).
    async fn read_request(&mut self) -> crate::Result<Option<Request>>;

    /// Sends response headers with the given disposition. Must synthesize
    /// `date`, `content-length` (for `Raw`), `transfer-encoding: chunked`
    /// (for `ChunkEncoded` when no `content-length` is already set), and
    /// negotiate `connection:`; HTTP/2 transports ignore the
    /// `connection:` step, there being no such header in HTTP/2.
    async fn send_headers(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        disposition: Disposition,
    ) -> crate::Result<()>;

    /// Sends body bytes; `end` indicates this is the final call for a `Raw`
    /// disposition.
    async fn send_data(&mut self, bytes: Bytes, end: bool) -> crate::Result<()>;

    /// Sends one chunk of a `ChunkEncoded` body.
    async fn send_chunk(&mut self, bytes: Bytes) -> crate::Result<()>;

    /// Sends a file range via the most efficient mechanism available
    /// (`sendfile` on HTTP/1; DATA frames read from the file on HTTP/2).
    async fn send_file(&mut self, path: &std::path::Path, offset: u64, len: u64) -> crate::Result<()>;

    /// Sends a full [`Body`] value using whichever of the above calls fits
    /// its variant; a convenience built from the primitives above so
    /// higher-level callers (the pipeline) don't re-implement the dispatch.
    async fn send_body(&mut self, body: Body) -> crate::Result<()> {
        match body {
            Body::None => Ok(()),
            Body::Inline(bytes) => self.send_data(bytes, true).await,
            Body::File { path, offset, length } => self.send_file(&path, offset, length).await,
            Body::Chunked(mut stream) => {
                use futures_util::StreamExt;
                while let Some(chunk) = stream.next().await {
                    self.send_chunk(chunk?).await?;
                }
                Ok(())
            }
        }
    }

    /// Drains any unread request body before starting the next keep-alive
    /// cycle; failure closes the connection.
    async fn ensure_completed(&mut self) -> crate::Result<()>;

    /// Closes the underlying transport.
    async fn close(&mut self);
}
