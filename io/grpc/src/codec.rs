//! Message serialization seam between streams and protobuf types.

use crate::status::Status;
use bytes::Bytes;

/// A message that can be queued on a send stream.
///
/// Implemented for every [`prost::Message`], so generated types and the
/// protobuf well-known wrappers work directly.
pub trait EncodeMessage: Send {
    fn encode_to_bytes(&self) -> Bytes;
}

impl<T: prost::Message + Send> EncodeMessage for T {
    fn encode_to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }
}

/// Parse one received payload.
pub fn decode<M: prost::Message + Default>(payload: Bytes) -> Result<M, Status> {
    M::decode(payload).map_err(|e| Status::internal(format!("failed to decode message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prost_types_encode() {
        let encoded = String::from("hi").encode_to_bytes();
        // a bare string is encoded as field 1
        assert_eq!(&encoded[..], b"\x0a\x02hi");
        assert_eq!(decode::<String>(encoded).unwrap(), "hi");
    }

    #[test]
    fn test_decode_failure_is_internal() {
        let err = decode::<String>(Bytes::from_static(b"\x0a\x05hi")).unwrap_err();
        assert_eq!(err.code(), crate::status::Code::Internal);
    }
}
