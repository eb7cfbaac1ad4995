//! Per-message deflate (RFC 7692), built on `flate2`'s raw-deflate
//! `Compress`/`Decompress` types — the same crate the HTTP/1 driver uses
//! for gzip/deflate `content-encoding`.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Negotiated permessage-deflate parameters for one connection.
#[derive(Debug, Clone, Copy)]
pub struct DeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: i8,
    pub client_max_window_bits: i8,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        }
    }
}

/// Parses `Sec-WebSocket-Extensions` and accepts the first recognized,
/// valid `permessage-deflate` offer. Returns `None` if no offer is
/// present or none is acceptable — the connection simply runs uncompressed.
#[must_use]
pub fn negotiate(header_value: &str) -> Option<DeflateParams> {
    for offer in header_value.split(',') {
        let mut parts = offer.split(';').map(str::trim);
        let name = parts.next()?;
        if !name.eq_ignore_ascii_case("permessage-deflate") {
            continue;
        }

        let mut params = DeflateParams::default();
        let mut ok = true;
        for param in parts {
            if param.is_empty() {
                continue;
            }
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "server_no_context_takeover" => params.server_no_context_takeover = true,
                "client_no_context_takeover" => params.client_no_context_takeover = true,
                "server_max_window_bits" => match parse_window_bits(value) {
                    Some(bits) => params.server_max_window_bits = bits,
                    None => {
                        ok = false;
                        break;
                    }
                },
                "client_max_window_bits" => {
                    if value.is_empty() {
                        // a bare client_max_window_bits (no value) is a valid offer; keep default.
                        continue;
                    }
                    match parse_window_bits(value) {
                        Some(bits) => params.client_max_window_bits = bits,
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return Some(params);
        }
    }
    None
}

fn parse_window_bits(value: &str) -> Option<i8> {
    let bits: i8 = value.parse().ok()?;
    if (8..=15).contains(&bits) {
        Some(bits)
    } else {
        None
    }
}

/// zlib's `windowBits` does not accept `-8`; RFC 7692 directs
/// implementations to substitute `-9` in that case.
#[must_use]
fn effective_window_bits(bits: i8) -> i8 {
    if bits == 8 { 9 } else { bits }
}

/// One direction's persistent (or per-message, if `no_context_takeover`)
/// deflate/inflate state for a WebSocket connection.
pub struct DeflateContext {
    compress: Compress,
    decompress: Decompress,
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
}

impl DeflateContext {
    #[must_use]
    pub fn new(params: DeflateParams, level: Compression) -> Self {
        Self {
            compress: Compress::new_with_window_bits(
                level,
                false,
                effective_window_bits(params.server_max_window_bits) as u8,
            ),
            decompress: Decompress::new_with_window_bits(
                false,
                effective_window_bits(params.client_max_window_bits) as u8,
            ),
            server_no_context_takeover: params.server_no_context_takeover,
            client_no_context_takeover: params.client_no_context_takeover,
        }
    }

    /// Deflates one message payload and strips the trailing 4 bytes
    /// (`00 00 FF FF`) per RFC 7692 Input/output cursors are tracked
    /// as deltas from this call's starting totals, since `total_in`/
    /// `total_out` accumulate across the connection's lifetime whenever
    /// context takeover keeps the dictionary alive between messages.
    pub fn deflate_message(&mut self, data: &[u8]) -> Vec<u8> {
        let start_in = self.compress.total_in();
        let start_out = self.compress.total_out();
        let mut out = Vec::with_capacity(data.len());
        loop {
            let consumed = (self.compress.total_in() - start_in) as usize;
            let produced_so_far = (self.compress.total_out() - start_out) as usize;
            out.resize(produced_so_far + 4096, 0);
            let status = self
                .compress
                .compress(&data[consumed..], &mut out[produced_so_far..], FlushCompress::Sync)
                .expect("deflate never fails for valid zlib state");
            let produced_now = (self.compress.total_out() - start_out) as usize;
            out.truncate(produced_now);
            let consumed_now = (self.compress.total_in() - start_in) as usize;
            if status == Status::StreamEnd || consumed_now >= data.len() {
                break;
            }
        }
        if out.ends_with(&[0x00, 0x00, 0xFF, 0xFF]) {
            out.truncate(out.len() - 4);
        }
        if self.server_no_context_takeover {
            self.compress.reset();
        }
        out
    }

    /// Inflates one message payload after appending the trailing
    /// `00 00 FF FF` RFC 7692 requires before decompression.
    pub fn inflate_message(&mut self, data: &[u8]) -> Result<Vec<u8>, crate::error::WsError> {
        let mut input = Vec::with_capacity(data.len() + 4);
        input.extend_from_slice(data);
        input.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);

        let start_in = self.decompress.total_in();
        let start_out = self.decompress.total_out();
        let mut out = Vec::with_capacity(data.len() * 3 + 32);
        loop {
            let consumed = (self.decompress.total_in() - start_in) as usize;
            let produced_so_far = (self.decompress.total_out() - start_out) as usize;
            out.resize(produced_so_far + 4096, 0);
            let status = self
                .decompress
                .decompress(&input[consumed..], &mut out[produced_so_far..], FlushDecompress::Sync)
                .map_err(|e| crate::error::WsError::InvalidPayload(e.to_string()))?;
            let produced_now = (self.decompress.total_out() - start_out) as usize;
            out.truncate(produced_now);
            let consumed_now = (self.decompress.total_in() - start_in) as usize;
            if status == Status::StreamEnd || consumed_now >= input.len() {
                break;
            }
        }
        if self.client_no_context_takeover {
            self.decompress.reset(false);
        }
        Ok(out)
    }
}
