//! HPACK header compression (RFC 7541).
//!
//! Thin adapter over `fluke-hpack` that speaks [`HeaderField`]s.

use fluke_hpack::{Decoder, Encoder};

/// A single header field. Names are lowercase on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pseudo-header fields start with `:`.
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Size counted against SETTINGS_MAX_HEADER_LIST_SIZE (RFC 7541 4.1).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// Error decoding a header block. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hpack decoding failed: {0}")]
pub struct HpackError(pub String);

/// Header block encoder for one direction of a connection.
pub struct HpackEncoder {
    inner: Encoder<'static>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: Encoder::new(),
        }
    }

    /// Encode `headers` in order, appending the block to `buf`.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        let block = self
            .inner
            .encode(headers.iter().map(|h| (h.name.as_slice(), h.value.as_slice())));
        buf.extend_from_slice(&block);
    }
}

/// Header block decoder for one direction of a connection.
pub struct HpackDecoder {
    inner: Decoder<'static>,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: Decoder::new(),
        }
    }

    /// Decode a complete header block (HEADERS plus any CONTINUATIONs).
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        self.inner
            .decode(block)
            .map(|fields| {
                fields
                    .into_iter()
                    .map(|(name, value)| HeaderField { name, value })
                    .collect()
            })
            .map_err(|e| HpackError(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_order_and_duplicates() {
        let headers = vec![
            HeaderField::new(":method", "POST"),
            HeaderField::new(":path", "/pkg.Service/Method"),
            HeaderField::new("x-trace", "a"),
            HeaderField::new("x-trace", "b"),
        ];

        let mut block = Vec::new();
        HpackEncoder::new().encode(&headers, &mut block);

        let decoded = HpackDecoder::new().decode(&block).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn test_decoder_keeps_state_across_blocks() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        for path in ["/a", "/b", "/a"] {
            let headers = vec![
                HeaderField::new(":status", "200"),
                HeaderField::new("content-type", "application/grpc"),
                HeaderField::new("x-path", path),
            ];
            let mut block = Vec::new();
            encoder.encode(&headers, &mut block);
            assert_eq!(decoder.decode(&block).unwrap(), headers);
        }
    }

    #[test]
    fn test_decode_garbage() {
        // indexed field 0 is never valid
        assert!(HpackDecoder::new().decode(&[0x80]).is_err());
    }

    #[test]
    fn test_pseudo() {
        assert!(HeaderField::new(":status", "200").is_pseudo());
        assert!(!HeaderField::new("te", "trailers").is_pseudo());
    }
}
