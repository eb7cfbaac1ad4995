//! Pure byte↔frame conversions for HTTP/1.
//! `httparse` handles the request line and headers; the chunked
//! transfer-encoding rules come from RFC 9112 for the chunk reader/writer.

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Version};

use crate::error::Http1Error;
use crate::model::HeaderList;

/// A parsed request line and header block, before any body has been read.
pub struct ParsedHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderList,
    /// Number of bytes of `buf` the head occupied, so the caller can advance
    /// past it to find where the body begins.
    pub consumed: usize,
}

/// Parses a request line + header block out of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete `\r\n\r\n`
/// terminated head (the caller should read more bytes and retry), bounded by
/// `max_line` (request-line length, `max_request_line_length`) and
/// `max_header_len`/`max_header_count`.
pub fn parse_head(
    buf: &[u8],
    max_line: usize,
    max_header_len: usize,
    max_header_count: usize,
) -> Result<Option<ParsedHead>, Http1Error> {
    // Bound the request line specifically: scan for the first CRLF and
    // reject if it is longer than max_line, independent of whether the full
    // header block has arrived yet.
    if let Some(line_end) = find(buf, b"\r\n") {
        if line_end > max_line {
            return Err(Http1Error::UriTooLong);
        }
    } else if buf.len() > max_line {
        return Err(Http1Error::UriTooLong);
    }

    if buf.len() > max_header_len.saturating_add(max_line) && find(buf, b"\r\n\r\n").is_none() {
        return Err(Http1Error::HeaderFieldsTooLarge);
    }

    let mut header_storage = vec![httparse::EMPTY_HEADER; max_header_count.max(1)];
    let mut req = httparse::Request::new(&mut header_storage);
    let status = req.parse(buf).map_err(|e| Http1Error::Malformed(e.to_string()))?;

    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    if req.headers.len() >= max_header_count {
        return Err(Http1Error::HeaderFieldsTooLarge);
    }

    let method = req
        .method
        .ok_or_else(|| Http1Error::Malformed("missing method".into()))?
        .parse::<Method>()
        .map_err(|e| Http1Error::Malformed(e.to_string()))?;
    let target = req
        .path
        .ok_or_else(|| Http1Error::Malformed("missing request target".into()))?
        .to_string();
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Http1Error::Malformed("unsupported http version".into())),
    };

    let mut headers = HeaderList::new();
    let mut header_bytes = 0usize;
    for h in req.headers.iter() {
        let name = h.name.to_ascii_lowercase();
        let value = std::str::from_utf8(h.value)
            .map_err(|e| Http1Error::Malformed(e.to_string()))?
            .to_string();
        header_bytes += name.len() + value.len();
        if header_bytes > max_header_len {
            return Err(Http1Error::HeaderFieldsTooLarge);
        }
        headers.push((name, value));
    }

    // Reject content-length + transfer-encoding combined (RFC 9112).
    let has_content_length = headers.iter().any(|(n, _)| n == "content-length");
    let has_transfer_encoding = headers.iter().any(|(n, _)| n == "transfer-encoding");
    if has_content_length && has_transfer_encoding {
        return Err(Http1Error::AmbiguousFraming);
    }
    if has_transfer_encoding {
        let te = headers
            .iter()
            .find(|(n, _)| n == "transfer-encoding")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        if !te.eq_ignore_ascii_case("chunked") {
            return Err(Http1Error::UnsupportedTransferEncoding(te));
        }
    }

    Ok(Some(ParsedHead {
        method,
        target,
        version,
        headers,
        consumed,
    }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + needle.len())
}

/// How the declared request body is framed, decided from the parsed headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (no `content-length`, no `transfer-encoding`).
    None,
    /// `content-length: N`.
    ContentLength(u64),
    /// `transfer-encoding: chunked`.
    Chunked,
}

/// Determines body framing from already-parsed, already-validated headers.
#[must_use]
pub fn body_framing(headers: &HeaderList) -> BodyFraming {
    if let Some((_, v)) = headers.iter().find(|(n, _)| n == "content-length") {
        if let Ok(n) = v.trim().parse::<u64>() {
            return BodyFraming::ContentLength(n);
        }
    }
    if headers
        .iter()
        .any(|(n, v)| n == "transfer-encoding" && v.eq_ignore_ascii_case("chunked"))
    {
        return BodyFraming::Chunked;
    }
    BodyFraming::None
}

/// Incrementally decodes a chunked-transfer-encoded byte stream.
///
/// Both `0\r\n\r\n` and `0\r\n<trailers>\r\n` end the body; trailers are
/// discarded; nothing past the final blank-line `\r\n` is consumed.
#[derive(Debug, Default)]
pub struct ChunkedDecoder {
    state: ChunkedState,
}

#[derive(Debug)]
enum ChunkedState {
    /// Waiting for a chunk-size line.
    Size,
    /// Reading `remaining` more bytes of the current chunk's data.
    Data { remaining: u64 },
    /// Consumed a chunk's data; waiting for its trailing CRLF.
    DataCrlf,
    /// Reading trailer lines after the terminating `0`-size chunk.
    Trailers,
    Done,
}

impl Default for ChunkedState {
    fn default() -> Self {
        Self::Size
    }
}

impl ChunkedDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, ChunkedState::Done)
    }

    /// Consumes as much of `buf` as forms complete chunk framing, appending
    /// decoded data bytes to `out`. Returns the number of bytes of `buf`
    /// consumed; call again with more bytes if not yet done.
    pub fn decode(&mut self, buf: &[u8], out: &mut BytesMut) -> Result<usize, Http1Error> {
        let mut pos = 0;
        loop {
            match self.state {
                ChunkedState::Done => return Ok(pos),
                ChunkedState::Size => {
                    let Some(line_end) = find(&buf[pos..], b"\r\n") else {
                        return Ok(pos);
                    };
                    let line = &buf[pos..pos + line_end - 2];
                    let line = std::str::from_utf8(line)
                        .map_err(|e| Http1Error::Malformed(e.to_string()))?;
                    let size_str = line.split(';').next().unwrap_or(line).trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| Http1Error::Malformed("bad chunk size".into()))?;
                    pos += line_end;
                    if size == 0 {
                        self.state = ChunkedState::Trailers;
                    } else {
                        self.state = ChunkedState::Data { remaining: size };
                    }
                }
                ChunkedState::Data { remaining } => {
                    let available = (buf.len() - pos) as u64;
                    let take = remaining.min(available) as usize;
                    out.put_slice(&buf[pos..pos + take]);
                    pos += take;
                    let left = remaining - take as u64;
                    if left == 0 {
                        self.state = ChunkedState::DataCrlf;
                    } else {
                        self.state = ChunkedState::Data { remaining: left };
                        return Ok(pos);
                    }
                }
                ChunkedState::DataCrlf => {
                    if buf.len() - pos < 2 {
                        return Ok(pos);
                    }
                    if &buf[pos..pos + 2] != b"\r\n" {
                        return Err(Http1Error::Malformed("missing chunk CRLF".into()));
                    }
                    pos += 2;
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let Some(line_end) = find(&buf[pos..], b"\r\n") else {
                        return Ok(pos);
                    };
                    let is_blank = line_end == 2;
                    pos += line_end;
                    if is_blank {
                        self.state = ChunkedState::Done;
                        return Ok(pos);
                    }
                    // Non-blank trailer line: discard it.
                }
            }
        }
    }
}

/// Encodes `data` as one chunked-transfer-encoding chunk (size line + data +
/// trailing CRLF). An empty slice is encoded as the terminating
/// `0\r\n\r\n` chunk.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 16);
    if data.is_empty() {
        out.put_slice(b"0\r\n\r\n");
    } else {
        out.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
        out.put_slice(data);
        out.put_slice(b"\r\n");
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let buf = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let parsed = parse_head(buf, 10_000, 10_000, 50).unwrap().unwrap();
        assert_eq!(parsed.method, Method::GET);
        assert_eq!(parsed.target, "/");
        assert_eq!(parsed.version, Version::HTTP_11);
        assert_eq!(parsed.headers, vec![("host".to_string(), "h".to_string())]);
        assert_eq!(parsed.consumed, buf.len());
    }

    #[test]
    fn partial_head_is_none() {
        let buf = b"GET / HTTP/1.1\r\nHost: h\r\n";
        assert!(parse_head(buf, 10_000, 10_000, 50).unwrap().is_none());
    }

    #[test]
    fn uri_too_long_rejected() {
        let long_target = "/".to_string() + &"a".repeat(20);
        let buf = format!("GET {long_target} HTTP/1.1\r\n\r\n");
        let result = parse_head(buf.as_bytes(), 10, 10_000, 50);
        assert!(matches!(result, Err(Http1Error::UriTooLong)));
    }

    #[test]
    fn content_length_and_transfer_encoding_rejected() {
        let buf = b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n";
        let result = parse_head(buf, 10_000, 10_000, 50);
        assert!(matches!(result, Err(Http1Error::AmbiguousFraming)));
    }

    #[test]
    fn unsupported_transfer_encoding_rejected() {
        let buf = b"POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: gzip\r\n\r\n";
        let result = parse_head(buf, 10_000, 10_000, 50);
        assert!(matches!(result, Err(Http1Error::UnsupportedTransferEncoding(_))));
    }

    #[test]
    fn body_framing_detects_content_length() {
        let headers = vec![("content-length".to_string(), "42".to_string())];
        assert_eq!(body_framing(&headers), BodyFraming::ContentLength(42));
    }

    #[test]
    fn chunked_decode_simple() {
        let mut dec = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        let input = b"5\r\nhello\r\n0\r\n\r\n";
        let consumed = dec.decode(input, &mut out).unwrap();
        assert_eq!(consumed, input.len());
        assert!(dec.is_done());
        assert_eq!(&out[..], b"hello");
    }

    #[test]
    fn chunked_decode_with_trailers_discarded() {
        let mut dec = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        let input = b"3\r\nabc\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let consumed = dec.decode(input, &mut out).unwrap();
        assert_eq!(consumed, input.len());
        assert!(dec.is_done());
        assert_eq!(&out[..], b"abc");
    }

    #[test]
    fn chunked_decode_does_not_overconsume() {
        let mut dec = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        let input = b"0\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let consumed = dec.decode(input, &mut out).unwrap();
        assert_eq!(consumed, 5); // "0\r\n\r\n"
        assert!(dec.is_done());
    }

    #[test]
    fn chunked_decode_across_partial_reads() {
        let mut dec = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        let first = b"5\r\nhel";
        let c1 = dec.decode(first, &mut out).unwrap();
        assert_eq!(c1, first.len());
        assert!(!dec.is_done());
        let second = b"lo\r\n0\r\n\r\n";
        let c2 = dec.decode(second, &mut out).unwrap();
        assert_eq!(c2, second.len());
        assert!(dec.is_done());
        assert_eq!(&out[..], b"hello");
    }

    #[test]
    fn encode_chunk_roundtrips_through_decode() {
        let chunk = encode_chunk(b"payload");
        let term = encode_chunk(b"");
        let mut combined = BytesMut::new();
        combined.put_slice(&chunk);
        combined.put_slice(&term);
        let mut dec = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        dec.decode(&combined, &mut out).unwrap();
        assert!(dec.is_done());
        assert_eq!(&out[..], b"payload");
    }
}
