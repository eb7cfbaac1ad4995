//! HPACK Interface: the encode/decode contract for HTTP/2 header
//! blocks. A dedicated module exposing `encode(headers, ctx) -> bytes`
//! and `decode(bytes, ctx) -> headers` is sufficient here; the dynamic
//! table itself is `fluke_hpack`'s collaborator.

use crate::model::HeaderList;

/// Wraps a `fluke_hpack::Decoder`, owning the receive-direction dynamic
/// table for one connection. Mutated only by the
/// connection task.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl HpackDecoder {
    #[must_use]
    pub fn new(header_table_size: usize) -> Self {
        let mut inner = fluke_hpack::Decoder::new();
        inner.set_max_table_size(header_table_size);
        Self { inner }
    }

    /// Decodes one complete HPACK header block (already reassembled from
    /// HEADERS + any CONTINUATION frames) into an ordered header list.
    /// Multiple `cookie` headers are left as separate entries here; RFC 9113
    /// cookie concatenation is the caller's (stream dispatch)
    /// responsibility, since it is a semantic rule, not an HPACK one.
    pub fn decode(&mut self, block: &[u8]) -> crate::Result<HeaderList> {
        let pairs = self
            .inner
            .decode(block)
            .map_err(|e| crate::Error::Hpack(format!("{e:?}")))?;
        pairs
            .into_iter()
            .map(|(name, value)| {
            let name = String::from_utf8(name).map_err(|e| crate::Error::Hpack(e.to_string()))?;
            let value = String::from_utf8(value).map_err(|e| crate::Error::Hpack(e.to_string()))?;
            Ok((name, value))
        })
            .collect()
    }
}

/// Wraps a `fluke_hpack::Encoder`, owning the send-direction dynamic table.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl HpackEncoder {
    #[must_use]
    pub fn new(header_table_size: usize) -> Self {
        let mut inner = fluke_hpack::Encoder::new();
        inner.set_max_table_size(header_table_size);
        Self { inner }
    }

    /// Encodes a header list into one HPACK block (the caller splits this
    /// across HEADERS/CONTINUATION frames per `max_frame_size`).
    #[must_use]
    pub fn encode(&mut self, headers: &HeaderList) -> Vec<u8> {
        let borrowed: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(n, v)| (n.as_bytes(), v.as_bytes()))
            .collect();
        self.inner.encode(borrowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// decode∘encode round-trips to the same header list.
    #[test]
    fn round_trip_header_list() {
        let headers: HeaderList = vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/".to_string()),
            ("x-custom".to_string(), "value".to_string()),
        ];
        let mut encoder = HpackEncoder::new(4096);
        let block = encoder.encode(&headers);

        let mut decoder = HpackDecoder::new(4096);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn repeated_encodes_use_dynamic_table_without_desync() {
        let mut encoder = HpackEncoder::new(4096);
        let mut decoder = HpackDecoder::new(4096);
        for i in 0..5 {
            let headers: HeaderList = vec![
                (":method".to_string(), "GET".to_string()),
                ("x-seq".to_string(), i.to_string()),
            ];
            let block = encoder.encode(&headers);
            let decoded = decoder.decode(&block).unwrap();
            assert_eq!(decoded, headers);
        }
    }
}
