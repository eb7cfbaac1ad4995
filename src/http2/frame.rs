//! HTTP/2 Frame Codec: pure byte↔frame conversions over the RFC
//! 9113 frame-type/flag/error-code tables, plus padding and priority
//! parsing for HEADERS and DATA.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Http2Error, Http2ErrorCode};

pub const FRAME_HEADER_LEN: usize = 9;

/// RFC 9113 frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    #[must_use]
    pub fn from_u8(b: u8) -> Self {
        match b {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::GoAway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(b) => b,
        }
    }
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// The 9-byte frame header common to every HTTP/2 frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32;
        let frame_type = FrameType::from_u8(buf[3]);
        let flags = buf[4];
        let stream_id = (((buf[5] as u32) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | buf[8] as u32)
        & 0x7FFF_FFFF;
        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.frame_type.to_u8());
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7FFF_FFFF);
    }

    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A parsed frame (Frame (HTTP/2) tagged union).
#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        header_block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        header_block: Bytes,
        end_headers: bool,
    },
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

/// Parses one frame given its header and exactly `header.length` payload
/// bytes. The caller is responsible for buffering until a full frame has
/// arrived and for the `payload.len() > remote max_frame_size` check,
/// which is a connection-policy decision made before this function runs.
pub fn parse_payload(header: &FrameHeader, payload: &[u8]) -> Result<Frame, Http2Error> {
    use Http2ErrorCode::{FrameSizeError, ProtocolError};
    match header.frame_type {
        FrameType::Data => {
            let (data, _) = strip_padding(header, payload)?;
            if header.stream_id == 0 {
                return Err(Http2Error::connection(ProtocolError, "DATA on stream 0"));
            }
            Ok(Frame::Data {
                stream_id: header.stream_id,
                data: Bytes::copy_from_slice(data),
                end_stream: header.has_flag(flags::END_STREAM),
            })
        }
        FrameType::Headers => {
            if header.stream_id == 0 {
                return Err(Http2Error::connection(ProtocolError, "HEADERS on stream 0"));
            }
            let (mut rest, _) = strip_padding(header, payload)?;
            if header.has_flag(flags::PRIORITY) {
                if rest.len() < 5 {
                    return Err(Http2Error::connection(FrameSizeError, "short PRIORITY prefix"));
                }
                rest = &rest[5..];
            }
            Ok(Frame::Headers {
                stream_id: header.stream_id,
                header_block: Bytes::copy_from_slice(rest),
                end_stream: header.has_flag(flags::END_STREAM),
                end_headers: header.has_flag(flags::END_HEADERS),
            })
        }
        FrameType::Priority => {
            if header.stream_id == 0 {
                return Err(Http2Error::connection(ProtocolError, "PRIORITY on stream 0"));
            }
            if payload.len() != 5 {
                return Err(Http2Error::connection(FrameSizeError, "PRIORITY must be 5 bytes"));
            }
            Ok(Frame::Priority {
                stream_id: header.stream_id,
            })
        }
        FrameType::RstStream => {
            if header.stream_id == 0 {
                return Err(Http2Error::connection(ProtocolError, "RST_STREAM on stream 0"));
            }
            if payload.len() != 4 {
                return Err(Http2Error::connection(FrameSizeError, "RST_STREAM must be 4 bytes"));
            }
            Ok(Frame::RstStream {
                stream_id: header.stream_id,
                error_code: u32::from_be_bytes(payload[..4].try_into().unwrap()),
            })
        }
        FrameType::Settings => {
            if header.stream_id != 0 {
                return Err(Http2Error::connection(ProtocolError, "SETTINGS on non-zero stream"));
            }
            let ack = header.has_flag(flags::ACK);
            if ack && !payload.is_empty() {
                return Err(Http2Error::connection(FrameSizeError, "SETTINGS ACK with payload"));
            }
            if payload.len() % 6 != 0 {
                return Err(Http2Error::connection(FrameSizeError, "SETTINGS payload not a multiple of 6"));
            }
            let mut params = Vec::with_capacity(payload.len() / 6);
            let mut chunk = payload;
            while !chunk.is_empty() {
                let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                params.push((id, value));
                chunk = &chunk[6..];
            }
            Ok(Frame::Settings { ack, params })
        }
        FrameType::PushPromise => Err(Http2Error::connection(ProtocolError, "PUSH_PROMISE rejected by design")),
        FrameType::Ping => {
            if header.stream_id != 0 {
                return Err(Http2Error::connection(ProtocolError, "PING on non-zero stream"));
            }
            if payload.len() != 8 {
                return Err(Http2Error::connection(FrameSizeError, "PING must be 8 bytes"));
            }
            Ok(Frame::Ping {
                ack: header.has_flag(flags::ACK),
                payload: payload[..8].try_into().unwrap(),
            })
        }
        FrameType::GoAway => {
            if payload.len() < 8 {
                return Err(Http2Error::connection(FrameSizeError, "GOAWAY too short"));
            }
            let last_stream_id = u32::from_be_bytes(payload[..4].try_into().unwrap()) & 0x7FFF_FFFF;
            let error_code = u32::from_be_bytes(payload[4..8].try_into().unwrap());
            Ok(Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data: Bytes::copy_from_slice(&payload[8..]),
            })
        }
        FrameType::WindowUpdate => {
            if payload.len() != 4 {
                return Err(Http2Error::connection(FrameSizeError, "WINDOW_UPDATE must be 4 bytes"));
            }
            let increment = u32::from_be_bytes(payload[..4].try_into().unwrap()) & 0x7FFF_FFFF;
            Ok(Frame::WindowUpdate {
                stream_id: header.stream_id,
                increment,
            })
        }
        FrameType::Continuation => {
            if header.stream_id == 0 {
                return Err(Http2Error::connection(ProtocolError, "CONTINUATION on stream 0"));
            }
            Ok(Frame::Continuation {
                stream_id: header.stream_id,
                header_block: Bytes::copy_from_slice(payload),
                end_headers: header.has_flag(flags::END_HEADERS),
            })
        }
        FrameType::Unknown(t) => Ok(Frame::Unknown {
            frame_type: t,
            stream_id: header.stream_id,
        }),
    }
}

fn strip_padding<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<(&'a [u8], u8), Http2Error> {
    if !header.has_flag(flags::PADDED) {
        return Ok((payload, 0));
    }
    if payload.is_empty() {
        return Err(Http2Error::connection(
            Http2ErrorCode::ProtocolError,
            "PADDED flag set with empty payload",
        ));
    }
    let pad_len = payload[0] as usize;
    // Padding length equal to payload_length - 1 is valid (consumes the
    // rest exactly); equal to payload_length is PROTOCOL_ERROR.
    if pad_len > payload.len() - 1 {
        return Err(Http2Error::connection(
            Http2ErrorCode::ProtocolError,
            "padding length exceeds payload",
        ));
    }
    let data_end = payload.len() - pad_len;
    Ok((&payload[1..data_end], pad_len as u8))
}

/// Serializes a frame to the wire, splitting any HEADERS block wider than
/// `max_frame_size` into a HEADERS frame followed by CONTINUATION frames.
/// Returns one `BytesMut` per wire frame.
#[must_use]
pub fn encode_headers_with_continuation(
    stream_id: u32,
    header_block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
) -> Vec<BytesMut> {
    let mut out = Vec::new();
    let mut chunks = header_block.chunks(max_frame_size.max(1));
    let first = chunks.next().unwrap_or(&[]);
    let is_only = header_block.len() <= max_frame_size;
    let mut flags = 0u8;
    if end_stream {
        flags |= self::flags::END_STREAM;
    }
    if is_only {
        flags |= self::flags::END_HEADERS;
    }
    out.push(encode_frame(
        FrameType::Headers,
        flags,
        stream_id,
        first,
    ));
    let remaining: Vec<&[u8]> = chunks.collect();
    for (i, chunk) in remaining.iter().enumerate() {
        let is_last = i + 1 == remaining.len();
        let flags = if is_last { self::flags::END_HEADERS } else { 0 };
        out.push(encode_frame(FrameType::Continuation, flags, stream_id, chunk));
    }
    out
}

#[must_use]
pub fn encode_frame(frame_type: FrameType, flags: u8, stream_id: u32, payload: &[u8]) -> BytesMut {
    let header = FrameHeader {
        length: payload.len() as u32,
        frame_type,
        flags,
        stream_id,
    };
    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    header.write(&mut out);
    out.put_slice(payload);
    out
}

#[must_use]
pub fn encode_data(stream_id: u32, data: &[u8], end_stream: bool) -> BytesMut {
    let flags = if end_stream { self::flags::END_STREAM } else { 0 };
    encode_frame(FrameType::Data, flags, stream_id, data)
}

#[must_use]
pub fn encode_settings(ack: bool, params: &[(u16, u32)]) -> BytesMut {
    if ack {
        return encode_frame(FrameType::Settings, flags::ACK, 0, &[]);
    }
    let mut payload = BytesMut::with_capacity(params.len() * 6);
    for (id, value) in params {
        payload.put_u16(*id);
        payload.put_u32(*value);
    }
    encode_frame(FrameType::Settings, 0, 0, &payload)
}

#[must_use]
pub fn encode_ping(ack: bool, payload: [u8; 8]) -> BytesMut {
    let flags = if ack { self::flags::ACK } else { 0 };
    encode_frame(FrameType::Ping, flags, 0, &payload)
}

#[must_use]
pub fn encode_goaway(last_stream_id: u32, error_code: u32, debug_data: &[u8]) -> BytesMut {
    let mut payload = BytesMut::with_capacity(8 + debug_data.len());
    payload.put_u32(last_stream_id & 0x7FFF_FFFF);
    payload.put_u32(error_code);
    payload.put_slice(debug_data);
    encode_frame(FrameType::GoAway, 0, 0, &payload)
}

#[must_use]
pub fn encode_rst_stream(stream_id: u32, error_code: u32) -> BytesMut {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(error_code);
    encode_frame(FrameType::RstStream, 0, stream_id, &payload)
}

#[must_use]
pub fn encode_window_update(stream_id: u32, increment: u32) -> BytesMut {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(increment & 0x7FFF_FFFF);
    encode_frame(FrameType::WindowUpdate, 0, stream_id, &payload)
}

/// Reads a frame header + payload out of a growing buffer, returning the
/// parsed frame and the number of bytes consumed, or `None` if not enough
/// bytes have arrived yet. `max_frame_size` enforces the "payload too large"
/// connection error before the payload is even fully buffered.
pub fn try_parse_frame(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, Http2Error> {
    let Some(header) = FrameHeader::parse(buf) else {
        return Ok(None);
    };
    if header.length > max_frame_size {
        return Err(Http2Error::connection(
            Http2ErrorCode::FrameSizeError,
            "frame exceeds max_frame_size",
        ));
    }
    let total = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[FRAME_HEADER_LEN..total];
    let frame = parse_payload(&header, payload)?;
    Ok(Some((frame, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A frame round-trips through encode then decode (modulo padding).
    #[test]
    fn data_frame_round_trips() {
        let encoded = encode_data(1, b"hello", true);
        let (frame, consumed) = try_parse_frame(&encoded, 16_384).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        match frame {
            Frame::Data { stream_id, data, end_stream } => {
                assert_eq!(stream_id, 1);
                assert_eq!(&data[..], b"hello");
                assert!(end_stream);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn settings_frame_round_trips() {
        let encoded = encode_settings(false, &[(0x1, 4096), (0x3, 100)]);
        let (frame, _) = try_parse_frame(&encoded, 16_384).unwrap().unwrap();
        match frame {
            Frame::Settings { ack, params } => {
                assert!(!ack);
                assert_eq!(params, vec![(0x1, 4096), (0x3, 100)]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn settings_ack_with_payload_is_frame_size_error() {
        let mut encoded = encode_frame(FrameType::Settings, flags::ACK, 0, &[0u8; 6]);
        let header = FrameHeader::parse(&encoded).unwrap();
        let result = parse_payload(&header, &encoded.split_off(FRAME_HEADER_LEN));
        assert!(matches!(
            result,
            Err(Http2Error::Connection { code: Http2ErrorCode::FrameSizeError, .. })
        ));
    }

    /// Padding length == payload_length - 1 is valid; == payload_length is
    /// PROTOCOL_ERROR.
    #[test]
    fn data_padding_boundary() {
        let header = FrameHeader {
            length: 2,
            frame_type: FrameType::Data,
            flags: flags::PADDED,
            stream_id: 1,
        };
        // payload = [pad_len=1, data_byte] -> pad_len (1) == payload.len()-1 (1): valid, empty data.
        let ok = parse_payload(&header, &[1, b'x']);
        assert!(ok.is_ok());

        let header_bad = FrameHeader {
            length: 1,
            frame_type: FrameType::Data,
            flags: flags::PADDED,
            stream_id: 1,
        };
        // payload = [pad_len=1] -> pad_len (1) == payload.len() (1): PROTOCOL_ERROR.
        let bad = parse_payload(&header_bad, &[1]);
        assert!(matches!(
            bad,
            Err(Http2Error::Connection { code: Http2ErrorCode::ProtocolError, .. })
        ));
    }

    #[test]
    fn push_promise_is_always_protocol_error() {
        let header = FrameHeader {
            length: 4,
            frame_type: FrameType::PushPromise,
            flags: 0,
            stream_id: 1,
        };
        let result = parse_payload(&header, &[0, 0, 0, 3]);
        assert!(matches!(
            result,
            Err(Http2Error::Connection { code: Http2ErrorCode::ProtocolError, .. })
        ));
    }

    #[test]
    fn unknown_frame_type_is_ignored() {
        let header = FrameHeader {
            length: 3,
            frame_type: FrameType::Unknown(0x7f),
            flags: 0,
            stream_id: 5,
        };
        let frame = parse_payload(&header, &[1, 2, 3]).unwrap();
        assert!(matches!(frame, Frame::Unknown { frame_type: 0x7f, stream_id: 5 }));
    }

    #[test]
    fn headers_with_continuation_splits_on_max_frame_size() {
        let block = vec![0xAB; 50];
        let frames = encode_headers_with_continuation(1, &block, true, 20);
        assert_eq!(frames.len(), 3); // 20 + 20 + 10
        let first_header = FrameHeader::parse(&frames[0]).unwrap();
        assert!(!first_header.has_flag(flags::END_HEADERS));
        assert!(first_header.has_flag(flags::END_STREAM));
        let last_header = FrameHeader::parse(frames.last().unwrap()).unwrap();
        assert!(last_header.has_flag(flags::END_HEADERS));
        assert_eq!(FrameType::from_u8(last_header.frame_type.to_u8()), FrameType::Continuation);
    }

    #[test]
    fn oversize_frame_is_frame_size_error() {
        let encoded = encode_data(1, &vec![0u8; 100], false);
        let result = try_parse_frame(&encoded, 10);
        assert!(matches!(
            result,
            Err(Http2Error::Connection { code: Http2ErrorCode::FrameSizeError, .. })
        ));
    }

    #[test]
    fn ping_round_trips() {
        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        let encoded = encode_ping(false, payload);
        let (frame, _) = try_parse_frame(&encoded, 16_384).unwrap().unwrap();
        assert!(matches!(frame, Frame::Ping { ack: false, payload: p } if p == payload));
    }
}
