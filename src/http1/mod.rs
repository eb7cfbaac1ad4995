//! HTTP/1 State Machine: one per connection, driving the
//! [`crate::transport::HttpTransport`] contract for successive keep-alive
//! requests. The read loop buffers, parses the request head, streams the
//! body, writes the response, and loops for the next keep-alive request.

pub mod codec;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;

use self::codec::{body_framing, encode_chunk, parse_head, BodyFraming, ChunkedDecoder};
use crate::config::Http1Config;
use crate::error::Http1Error;
use crate::fuse::{self, FuseEvent, SharedWatch};
use crate::model::{BodyReader, HeaderList, Request};
use crate::transport::{Disposition, HttpTransport};

/// HTTP/1 Socket State read-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Unread,
    HeadersRead,
    Read,
}

/// HTTP/1 Socket State write-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Unsent,
    Writing,
    ChunkStreaming,
    Sent,
}

/// The in-progress request body's drain state, tracked on [`Shared`] (not on
/// the [`Http1BodyReader`] alone) so [`Http1Connection::ensure_completed`]
/// can finish a body the handler never fully read, without needing the
/// handler's own reader handle ("drains any unread request body before
/// starting the next keep-alive cycle").
struct BodyDrainState {
    framing: BodyFraming,
    content_length_remaining: u64,
    chunked: ChunkedDecoder,
    done: bool,
}

impl BodyDrainState {
    fn for_framing(framing: BodyFraming) -> Self {
        Self {
            framing,
            content_length_remaining: match framing {
                BodyFraming::ContentLength(n) => n,
                _ => 0,
            },
            chunked: ChunkedDecoder::new(),
            done: matches!(framing, BodyFraming::None),
        }
    }
}

struct Shared<S> {
    socket: S,
    buf: BytesMut,
    watch: SharedWatch,
    body: BodyDrainState,
}

impl<S: AsyncRead + Unpin> Shared<S> {
    /// Reads more bytes from the socket into `buf`, bounded by `timeout_dur`
    /// and racing the connection's [`crate::fuse::ConnectionWatch`]: whichever fires first ends the read.
    async fn fill(&mut self, timeout_dur: Duration) -> crate::Result<usize> {
        let mut tmp = [0u8; 8192];
        tokio::select! {
            biased;
            () = self.watch.should_fuse() => Err(Http1Error::ReadTimeout.into()),
            result = timeout(timeout_dur, self.socket.read(&mut tmp)) => {
                let n = result.map_err(|_| Http1Error::ReadTimeout)??;
                self.buf.extend_from_slice(&tmp[..n]);
                if n > 0 {
                    self.watch.on_event(FuseEvent::Progress);
                }
                Ok(n)
            }
        }
    }
}

/// Drains a request body according to its framing, reading from the shared
/// socket buffer. Implements [`BodyReader`] so the pipeline can drive it
/// without knowing it is talking to HTTP/1.
struct Http1BodyReader<S> {
    shared: Arc<Mutex<Shared<S>>>,
    timeout_dur: Duration,
}

#[async_trait::async_trait]
impl<S: AsyncRead + Unpin + Send> BodyReader for Http1BodyReader<S> {
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        let mut shared = self.shared.lock().await;
        if shared.body.done {
            return Ok(None);
        }
        match shared.body.framing {
            BodyFraming::None => {
                shared.body.done = true;
                Ok(None)
            }
            BodyFraming::ContentLength(_) => {
                if shared.body.content_length_remaining == 0 {
                    shared.body.done = true;
                    return Ok(None);
                }
                while shared.buf.is_empty() {
                    shared.watch.on_event(FuseEvent::BodyRead);
                    let n = shared.fill(self.timeout_dur).await?;
                    if n == 0 {
                        return Err(Http1Error::BodyOverrun.into());
                    }
                }
                let take = (shared.body.content_length_remaining as usize).min(shared.buf.len());
                let chunk = shared.buf.split_to(take).freeze();
                shared.body.content_length_remaining -= chunk.len() as u64;
                if shared.body.content_length_remaining == 0 {
                    shared.body.done = true;
                }
                Ok(Some(chunk))
            }
            BodyFraming::Chunked => {
                if shared.body.chunked.is_done() {
                    shared.body.done = true;
                    return Ok(None);
                }
                loop {
                    let mut out = BytesMut::new();
                    let consumed = shared.body.chunked.decode(&shared.buf, &mut out)?;
                    let _ = shared.buf.split_to(consumed);
                    if !out.is_empty() {
                        return Ok(Some(out.freeze()));
                    }
                    if shared.body.chunked.is_done() {
                        shared.body.done = true;
                        return Ok(None);
                    }
                    shared.watch.on_event(FuseEvent::BodyRead);
                    let n = shared.fill(self.timeout_dur).await?;
                    if n == 0 {
                        return Err(Http1Error::Malformed("eof mid-chunk".into()).into());
                    }
                }
            }
        }
    }
}

/// The HTTP/1 connection state machine. Owns the socket for the
/// lifetime of the (possibly keep-alive) connection.
pub struct Http1Connection<S> {
    shared: Arc<Mutex<Shared<S>>>,
    config: Http1Config,
    version: Version,
    keepalive: bool,
    requests_served: usize,
    read_state: ReadState,
    write_state: WriteState,
    peer_addr: Option<std::net::SocketAddr>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> Http1Connection<S> {
    #[must_use]
    pub fn new(socket: S, config: Http1Config) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                socket,
                buf: BytesMut::new(),
                watch: fuse::none(),
                body: BodyDrainState::for_framing(BodyFraming::None),
            })),
            config,
            version: Version::HTTP_11,
            keepalive: true,
            requests_served: 0,
            read_state: ReadState::Unread,
            write_state: WriteState::Unsent,
            peer_addr: None,
        }
    }

    #[must_use]
    pub fn with_peer_addr(mut self, addr: std::net::SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Installs a [`crate::fuse::ConnectionWatch`] to monitor this
    /// connection's header and body reads for abuse/idleness beyond its own
    /// per-read `read_timeout`. Must be called before the first
    /// [`read_request`](Self::read_request), since `Shared` is cloned into
    /// every body reader handed out afterwards.
    #[must_use]
    pub fn with_watch(self, watch: SharedWatch) -> Self {
        if let Ok(mut shared) = self.shared.try_lock() {
            shared.watch = watch;
        }
        self
    }

    /// Unwraps the connection back into its raw socket and any bytes
    /// already buffered past the last parsed request, for a 101 WebSocket
    /// upgrade ("the HTTP/1 state machine is replaced in place by a
    /// WebSocket Connection bound to the same underlying socket"). Fails if
    /// an [`Http1BodyReader`] handed out to a handler is still alive.
    pub fn into_parts(self) -> crate::Result<(S, BytesMut)> {
        let shared = std::sync::Arc::try_unwrap(self.shared)
            .map_err(|_| crate::Error::other("socket still borrowed by an in-flight body reader"))?
            .into_inner();
        Ok((shared.socket, shared.buf))
    }

    /// Computes keep-alive from the declared version and the `connection`
    /// header, case-insensitively per RFC 9110.
    fn compute_keepalive(version: Version, headers: &HeaderList) -> bool {
        let connection_tokens: Vec<String> = headers
            .iter()
            .filter(|(n, _)| n == "connection")
            .flat_map(|(_, v)| v.split(',').map(|t| t.trim().to_ascii_lowercase()))
            .collect();
        let has_close = connection_tokens.iter().any(|t| t == "close");
        let has_keepalive = connection_tokens.iter().any(|t| t == "keep-alive");
        if has_close {
            return false;
        }
        match version {
            Version::HTTP_11 => true,
            Version::HTTP_10 => has_keepalive,
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> HttpTransport for Http1Connection<S> {
    async fn read_request(&mut self) -> crate::Result<Option<Request>> {
        if self.requests_served > 0 && self.config.max_requests > 0
        && self.requests_served >= self.config.max_requests
        {
            return Ok(None);
        }

        let parsed = loop {
            let mut shared = self.shared.lock().await;
            shared.watch.on_event(FuseEvent::HeaderRead);
            match parse_head(
                &shared.buf,
                self.config.max_request_line_length,
                self.config.max_header_length,
                self.config.max_header_count,
            ) {
                Ok(Some(parsed)) => {
                    let _ = shared.buf.split_to(parsed.consumed);
                    break parsed;
                }
                Ok(None) => {
                    let n = shared.fill(self.config.read_timeout).await;
                    match n {
                        Ok(0) if shared.buf.is_empty() => return Ok(None),
                        Ok(0) => return Err(Http1Error::Malformed("truncated request".into()).into()),
                        Ok(_) => continue,
                        Err(crate::Error::Http1(Http1Error::ReadTimeout)) if shared.buf.is_empty() => {
                            return Ok(None)
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.read_state = ReadState::HeadersRead;
        self.version = parsed.version;
        self.keepalive = Self::compute_keepalive(parsed.version, &parsed.headers);

        let framing = body_framing(&parsed.headers);
        {
            let mut shared = self.shared.lock().await;
            shared.body = BodyDrainState::for_framing(framing);
        }
        let body = Http1BodyReader {
            shared: self.shared.clone(),
            timeout_dur: self.config.read_timeout,
        };

        let authority = parsed
            .headers
            .iter()
            .find(|(n, _)| n == "host")
            .map(|(_, v)| v.clone());

        let mut req = Request::new(parsed.method, parsed.target, parsed.version);
        req.authority = authority;
        req.headers = parsed.headers;
        req.peer_addr = self.peer_addr;
        let req = req.with_body(body);
        Ok(Some(req))
    }

    async fn send_headers(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        disposition: Disposition,
    ) -> crate::Result<()> {
        self.write_state = WriteState::Writing;
        let mut out = BytesMut::new();
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason(status)).as_bytes());

        let mut has_date = false;
        let has_transfer_encoding = headers.contains_key(http::header::TRANSFER_ENCODING);

        for (name, value) in headers {
            if name == http::header::DATE {
                has_date = true;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if !has_date {
            out.extend_from_slice(b"date: ");
            out.extend_from_slice(http_date_now().as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        // `content-length` (Raw/HEAD) is synthesized by
        // `pipeline::commit_response` before headers reach this call, since
        // only the pipeline knows the response body's known length.
        if matches!(disposition, Disposition::ChunkEncoded) && !has_transfer_encoding {
            out.extend_from_slice(b"transfer-encoding: chunked\r\n");
            self.write_state = WriteState::ChunkStreaming;
        }

        if !matches!(disposition, Disposition::Inform) {
            out.extend_from_slice(b"connection: ");
            out.extend_from_slice(if self.keepalive { b"keep-alive" } else { b"close" });
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        let mut shared = self.shared.lock().await;
        shared.socket.write_all(&out).await?;
        Ok(())
    }

    async fn send_data(&mut self, bytes: Bytes, end: bool) -> crate::Result<()> {
        let mut shared = self.shared.lock().await;
        shared.socket.write_all(&bytes).await?;
        if end {
            self.write_state = WriteState::Sent;
        }
        Ok(())
    }

    async fn send_chunk(&mut self, bytes: Bytes) -> crate::Result<()> {
        let framed = encode_chunk(&bytes);
        let mut shared = self.shared.lock().await;
        shared.socket.write_all(&framed).await?;
        if bytes.is_empty() {
            self.write_state = WriteState::Sent;
        }
        Ok(())
    }

    async fn send_file(&mut self, path: &Path, offset: u64, len: u64) -> crate::Result<()> {
        use tokio::io::AsyncSeekExt;
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut remaining = len;
        let mut buf = vec![0u8; 64 * 1024];
        let mut shared = self.shared.lock().await;
        while remaining > 0 {
            let want = (buf.len() as u64).min(remaining) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            shared.socket.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        self.write_state = WriteState::Sent;
        Ok(())
    }

    async fn ensure_completed(&mut self) -> crate::Result<()> {
        // Drain any bytes of the current request's body the handler never
        // read, so they don't get misparsed as the start of the next
        // keep-alive request's head.
        let timeout_dur = self.config.read_timeout;
        let mut shared = self.shared.lock().await;
        while !shared.body.done {
            match shared.body.framing {
                BodyFraming::None => {
                    shared.body.done = true;
                }
                BodyFraming::ContentLength(_) => {
                    if shared.body.content_length_remaining == 0 {
                        shared.body.done = true;
                        break;
                    }
                    if shared.buf.is_empty() {
                        shared.watch.on_event(FuseEvent::BodyRead);
                        let n = shared.fill(timeout_dur).await?;
                        if n == 0 {
                            return Err(Http1Error::BodyOverrun.into());
                        }
                        continue;
                    }
                    let take = (shared.body.content_length_remaining as usize).min(shared.buf.len());
                    let _ = shared.buf.split_to(take);
                    shared.body.content_length_remaining -= take as u64;
                }
                BodyFraming::Chunked => {
                    let mut out = BytesMut::new();
                    let consumed = shared.body.chunked.decode(&shared.buf, &mut out)?;
                    let _ = shared.buf.split_to(consumed);
                    if shared.body.chunked.is_done() {
                        shared.body.done = true;
                        break;
                    }
                    shared.watch.on_event(FuseEvent::BodyRead);
                    let n = shared.fill(timeout_dur).await?;
                    if n == 0 {
                        return Err(Http1Error::Malformed("eof mid-chunk".into()).into());
                    }
                }
            }
        }
        drop(shared);
        self.read_state = ReadState::Read;
        self.requests_served += 1;
        Ok(())
    }

    async fn close(&mut self) {
        let mut shared = self.shared.lock().await;
        let _ = shared.socket.shutdown().await;
    }
}

impl<S> Http1Connection<S> {
    /// Whether the connection should read another request after the current
    /// response finishes.
    #[must_use]
    pub fn should_keep_alive(&self) -> bool {
        self.keepalive
        && (self.config.max_requests == 0 || self.requests_served < self.config.max_requests)
    }

    /// Whether response compression negotiation
    /// is enabled for this connection.
    #[must_use]
    pub fn compress_enabled(&self) -> bool {
        self.config.compress
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

/// A minimal RFC 9110 IMF-fixdate formatter, used to synthesize the
/// `date:` header when the handler didn't set one.
fn http_date_now() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_http_date(now)
}

fn format_http_date(secs: u64) -> String {
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let days_since_epoch = secs / 86_400;
    let day_of_week = DAYS[((days_since_epoch + 4) % 7) as usize];
    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let leap = is_leap(year);
        let year_len = if leap { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }
    let month_lengths = month_lengths(is_leap(year));
    let mut month = 0usize;
    while days >= month_lengths[month] {
        days -= month_lengths[month];
        month += 1;
    }
    let day = days + 1;
    let secs_of_day = secs % 86_400;
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!(
        "{day_of_week}, {day:02} {} {year} {hour:02}:{minute:02}:{second:02} GMT",
        MONTHS[month]
    )
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn month_lengths(leap: bool) -> [i64; 12] {
    [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ]
}

/// Negotiates a response compression algorithm from `accept-encoding`,
/// preferring gzip then x-gzip then deflate. Returns `None` if no
/// recognized encoding was offered, or if `content_encoding_already_set`.
#[must_use]
pub fn negotiate_compression(
    accept_encoding: Option<&str>,
    content_encoding_already_set: bool,
) -> Option<&'static str> {
    if content_encoding_already_set {
        return None;
    }
    let offered = accept_encoding?;
    let tokens: Vec<String> = offered
        .split(',')
        .map(|t| t.split(';').next().unwrap_or(t).trim().to_ascii_lowercase())
        .collect();
    for candidate in ["gzip", "x-gzip", "deflate"] {
        if tokens.iter().any(|t| t == candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Compresses `data` with the negotiated `encoding` (`gzip`/`x-gzip` share a
/// gzip encoder; `deflate` uses a zlib-framed deflate stream), mirroring the
/// codecs `salvo-compression` wires up via the same `flate2` crate.
pub fn compress(encoding: &str, data: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;
    match encoding {
        "gzip" | "x-gzip" => {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data)?;
            enc.finish()
        }
        "deflate" => {
            let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data)?;
            enc.finish()
        }
        _ => Ok(data.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_http11_default_true() {
        assert!(Http1Connection::<tokio::io::DuplexStream>::compute_keepalive(
            Version::HTTP_11,
            &[]
        ));
    }

    #[test]
    fn keepalive_http11_connection_close_false() {
        let headers = vec![("connection".to_string(), "close".to_string())];
        assert!(!Http1Connection::<tokio::io::DuplexStream>::compute_keepalive(
            Version::HTTP_11,
            &headers
        ));
    }

    #[test]
    fn keepalive_http10_default_false() {
        assert!(!Http1Connection::<tokio::io::DuplexStream>::compute_keepalive(
            Version::HTTP_10,
            &[]
        ));
    }

    #[test]
    fn keepalive_http10_explicit_keepalive_true() {
        let headers = vec![("connection".to_string(), "keep-alive".to_string())];
        assert!(Http1Connection::<tokio::io::DuplexStream>::compute_keepalive(
            Version::HTTP_10,
            &headers
        ));
    }

    #[test]
    fn keepalive_case_insensitive() {
        let headers = vec![("Connection".to_string(), "Close".to_string())];
        assert!(!Http1Connection::<tokio::io::DuplexStream>::compute_keepalive(
            Version::HTTP_11,
            &headers
        ));
    }

    #[test]
    fn negotiate_compression_prefers_gzip() {
        assert_eq!(
            negotiate_compression(Some("deflate, gzip"), false),
            Some("gzip")
        );
    }

    #[test]
    fn negotiate_compression_respects_existing_content_encoding() {
        assert_eq!(negotiate_compression(Some("gzip"), true), None);
    }

    #[test]
    fn negotiate_compression_none_offered() {
        assert_eq!(negotiate_compression(Some("br"), false), None);
    }

    #[test]
    fn http_date_format_is_imf_fixdate_shaped() {
        let date = format_http_date(0);
        assert_eq!(date, "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[tokio::test]
    async fn get_returns_200_with_content_length() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Http1Connection::new(server, Http1Config::default());

        let mut client = client;
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap();

        let req = conn.read_request().await.unwrap().unwrap();
        assert_eq!(req.method, Method::GET);

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("2"));
        conn.send_headers(StatusCode::OK, &headers, Disposition::Raw)
            .await
            .unwrap();
        conn.send_data(Bytes::from_static(b"OK"), true).await.unwrap();

        let mut response = vec![0u8; 256];
        let n = client.read(&mut response).await.unwrap();
        let text = String::from_utf8_lossy(&response[..n]);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nOK"));
    }

    #[tokio::test]
    async fn post_echoes_body() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut conn = Http1Connection::new(server, Http1Config::default());

        client
            .write_all(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        let mut req = conn.read_request().await.unwrap().unwrap();
        let body = req.take_body().read_to_end().await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn conflicting_framing_is_rejected_at_parse() {
        let buf = b"GET /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n";
        let result = parse_head(buf, 10_000, 10_000, 50);
        assert!(matches!(result, Err(Http1Error::AmbiguousFraming)));
    }

    /// An `IdleTimeoutWatch` installed via `with_watch` fuses a connection
    /// that never finishes sending its request head, independent of the
    /// connection's own (much longer) configured `read_timeout`.
    #[tokio::test]
    async fn idle_watch_fuses_a_stalled_head_read() {
        use crate::fuse::IdleTimeoutWatch;
        use std::sync::Arc;

        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Http1Connection::new(
            server,
            Http1Config::default().read_timeout(Duration::from_secs(60)),
        )
            .with_watch(Arc::new(IdleTimeoutWatch::new(Duration::from_millis(20))));

        // Only a partial request line is ever written; the connection never
        // gets enough to parse a head, so it should fuse on idleness rather
        // than wait the full 60s read_timeout.
        let mut client = client;
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), conn.read_request()).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
