//! Message assembly and close-handshake logic: a small explicit
//! accumulator struct rather than inline connection-driver state, so
//! fragment reassembly is unit-testable on its own, the same way the
//! HTTP/1 chunked-body codec is factored out of its connection driver.

use bytes::{Bytes, BytesMut};

use crate::error::WsError;
use crate::ws::frame::Opcode;

/// A complete, reassembled application message.
#[derive(Debug)]
pub struct Message {
    pub is_text: bool,
    pub data: Bytes,
}

/// Accumulates TEXT/BINARY fragments until a `fin=true` frame completes the
/// message.
#[derive(Default)]
pub struct FragmentAccumulator {
    pending: Option<(bool, BytesMut)>,
}

impl FragmentAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Feeds one non-control frame. Returns `Some(message)` once reassembly
    /// completes (`rsv1`/compression handling happens in the caller, since
    /// it needs the negotiated deflate context).
    pub fn push(&mut self, fin: bool, opcode: Opcode, payload: Bytes) -> Result<Option<(bool, Bytes)>, WsError> {
        match opcode {
            Opcode::Text | Opcode::Binary => {
                if self.pending.is_some() {
                    return Err(WsError::Protocol("new message started while a fragment is open".into()));
                }
                let is_text = opcode == Opcode::Text;
                if fin {
                    return Ok(Some((is_text, payload)));
                }
                let mut buf = BytesMut::new();
                buf.extend_from_slice(&payload);
                self.pending = Some((is_text, buf));
                Ok(None)
            }
            Opcode::Continuation => {
                let (is_text, buf) = self
                    .pending
                    .as_mut()
                    .ok_or_else(|| WsError::Protocol("continuation with no pending fragment".into()))?;
                buf.extend_from_slice(&payload);
                if fin {
                    let (is_text, buf) = self.pending.take().unwrap();
                    Ok(Some((is_text, buf.freeze())))
                } else {
                    let _ = is_text;
                    Ok(None)
                }
            }
            other => Err(WsError::Protocol(format!("{other:?} is a control opcode"))),
        }
    }
}

/// RFC 6455: classifies a received close code and picks the code to
/// echo back. Codes in the "unused/reserved" ranges force a 1002 reply.
#[must_use]
pub fn close_reply_code(received: Option<u16>) -> u16 {
    match received {
        None => 1000,
        Some(code) => {
            let acceptable = (1000..=1003).contains(&code) || (1007..=1011).contains(&code) || code >= 3000;
            if acceptable { 1000 } else { 1002 }
        }
    }
}

/// Parses a CLOSE frame payload into `(code, reason)`, per RFC 6455:
/// empty payload means no code; a payload of exactly 1 byte is malformed.
pub fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, String), WsError> {
    if payload.is_empty() {
        return Ok((None, String::new()));
    }
    if payload.len() == 1 {
        return Err(WsError::Protocol("close frame payload of length 1".into()));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| WsError::InvalidPayload("close reason not valid UTF-8".into()))?
        .to_string();
    Ok((Some(code), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A message split across fragments reassembles to the concatenation.
    #[test]
    fn fragments_reassemble_in_order() {
        let mut acc = FragmentAccumulator::new();
        assert!(acc.push(false, Opcode::Text, Bytes::from_static(b"Hel")).unwrap().is_none());
        assert!(acc.push(false, Opcode::Continuation, Bytes::from_static(b"lo ")).unwrap().is_none());
        let (is_text, data) = acc.push(true, Opcode::Continuation, Bytes::from_static(b"world")).unwrap().unwrap();
        assert!(is_text);
        assert_eq!(&data[..], b"Hello world");
    }

    #[test]
    fn unfragmented_message_dispatches_immediately() {
        let mut acc = FragmentAccumulator::new();
        let (is_text, data) = acc.push(true, Opcode::Binary, Bytes::from_static(b"x")).unwrap().unwrap();
        assert!(!is_text);
        assert_eq!(&data[..], b"x");
    }

    #[test]
    fn second_text_while_fragment_open_is_error() {
        let mut acc = FragmentAccumulator::new();
        acc.push(false, Opcode::Text, Bytes::from_static(b"a")).unwrap();
        assert!(acc.push(true, Opcode::Text, Bytes::from_static(b"b")).is_err());
    }

    #[test]
    fn continuation_without_pending_fragment_is_error() {
        let mut acc = FragmentAccumulator::new();
        assert!(acc.push(true, Opcode::Continuation, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn close_reply_code_accepts_known_ranges() {
        assert_eq!(close_reply_code(Some(1000)), 1000);
        assert_eq!(close_reply_code(Some(1008)), 1000);
        assert_eq!(close_reply_code(Some(3999)), 1000);
        assert_eq!(close_reply_code(None), 1000);
    }

    #[test]
    fn close_reply_code_rejects_reserved_ranges() {
        assert_eq!(close_reply_code(Some(1005)), 1002);
        assert_eq!(close_reply_code(Some(999)), 1002);
        assert_eq!(close_reply_code(Some(2999)), 1002);
    }

    #[test]
    fn close_payload_of_one_byte_is_malformed() {
        assert!(parse_close_payload(&[0x03]).is_err());
    }

    #[test]
    fn close_payload_parses_code_and_reason() {
        let mut payload = vec![0x03, 0xE8]; // 1000
        payload.extend_from_slice(b"bye");
        let (code, reason) = parse_close_payload(&payload).unwrap();
        assert_eq!(code, Some(1000));
        assert_eq!(reason, "bye");
    }
}
