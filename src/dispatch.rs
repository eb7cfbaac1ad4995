//! Protocol Dispatcher: chooses HTTP/1 vs HTTP/2 for a freshly
//! accepted connection, keeping "decide protocol" separate from "drive
//! protocol" so either side can change independently.

/// The protocol a connection will be driven as, chosen by ALPN or by
/// sniffing the plaintext preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
}

/// The 24-byte HTTP/2 connection preface (RFC 9113) that a plaintext
/// listener uses to distinguish an h2c request from HTTP/1.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Chooses a protocol from a negotiated ALPN identifier via substring
/// search, since some TLS stacks hand back the raw protocol list rather
/// than a single exact match.
#[must_use]
pub fn protocol_from_alpn(proto: impl AsRef<[u8]>) -> Protocol {
    if proto.as_ref().windows(2).any(|w| w == b"h2") {
        Protocol::Http2
    } else {
        Protocol::Http1
    }
}

/// Inspects the first bytes of a plaintext connection to detect the HTTP/2
/// connection preface. Returns `None` if not enough bytes have
/// arrived yet to decide (caller should read more and retry), `Some(proto)`
/// once a decision is possible.
///
/// Unlike ALPN dispatch this never silently assumes HTTP/1 on a short read:
/// a short, non-conflicting prefix of `HTTP2_PREFACE` is still "not decided
/// yet" so the caller does not misclassify a slow-arriving h2c preface as
/// HTTP/1.
#[must_use]
pub fn detect_plaintext_preface(buf: &[u8]) -> Option<Protocol> {
    let n = buf.len().min(HTTP2_PREFACE.len());
    if buf[..n] == HTTP2_PREFACE[..n] {
        if buf.len() >= HTTP2_PREFACE.len() {
            Some(Protocol::Http2)
        } else {
            None
        }
    } else {
        Some(Protocol::Http1)
    }
}
