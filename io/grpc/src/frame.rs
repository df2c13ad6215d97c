//! gRPC message framing.
//!
//! gRPC messages are length-prefixed with the following format:
//! - 1 byte: compressed flag (0 = uncompressed, 1 = compressed)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

use crate::buffer::ByteBuffer;
use crate::error::Error;
use bytes::Bytes;

/// Size of the gRPC message header (1 byte flag + 4 bytes length).
pub const HEADER_SIZE: usize = 5;

/// Default receive limit, matching other gRPC implementations.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// One length-prefixed message as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Append one framed message to `buf`.
pub fn encode_message(payload: &[u8], compressed: bool, buf: &mut ByteBuffer) {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = compressed as u8;
    header[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.write(&header);
    buf.write(payload);
}

/// Take one complete message off the head of `buf`.
///
/// Returns `Ok(None)` until a whole message is buffered. The header is
/// validated as soon as it is complete, so an oversized declared length is
/// rejected before its payload arrives.
pub fn decode_message(buf: &mut ByteBuffer, max_size: usize) -> Result<Option<RawMessage>, Error> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = buf.peek(HEADER_SIZE);
    let compressed = match header[0] {
        0 => false,
        1 => true,
        flag => {
            return Err(Error::Protocol(format!(
                "invalid compressed flag: {}",
                flag
            )));
        }
    };
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if length > max_size {
        return Err(Error::MessageTooLarge {
            size: length,
            max: max_size,
        });
    }
    if buf.len() < HEADER_SIZE + length {
        return Ok(None);
    }
    buf.discard(HEADER_SIZE);
    Ok(Some(RawMessage {
        compressed,
        payload: buf.read(length),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8], compressed: bool) -> ByteBuffer {
        let mut buf = ByteBuffer::new();
        encode_message(payload, compressed, &mut buf);
        buf
    }

    #[test]
    fn test_encode_empty_message() {
        let mut buf = framed(&[], false);
        assert_eq!(&buf.read_all()[..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_header_layout() {
        let mut buf = framed(b"hello world", true);
        let bytes = buf.read_all();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 11]);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello world");
    }

    #[test]
    fn test_decode_partial() {
        let mut whole = framed(b"hello", false).read_all();
        let mut buf = ByteBuffer::new();

        // header split across writes
        buf.write(&whole.split_to(3));
        assert_eq!(decode_message(&mut buf, 1024).unwrap(), None);
        buf.write(&whole.split_to(4));
        assert_eq!(decode_message(&mut buf, 1024).unwrap(), None);
        buf.write(&whole);

        let msg = decode_message(&mut buf, 1024).unwrap().unwrap();
        assert!(!msg.compressed);
        assert_eq!(&msg.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_several_in_one_buffer() {
        let mut buf = ByteBuffer::new();
        encode_message(b"one", false, &mut buf);
        encode_message(b"", false, &mut buf);
        encode_message(b"three", true, &mut buf);

        let mut out = Vec::new();
        while let Some(msg) = decode_message(&mut buf, 1024).unwrap() {
            out.push((msg.compressed, msg.payload));
        }
        assert_eq!(
            out,
            vec![
                (false, Bytes::from_static(b"one")),
                (false, Bytes::new()),
                (true, Bytes::from_static(b"three")),
            ]
        );
    }

    #[test]
    fn test_decode_bad_flag() {
        let mut buf = ByteBuffer::new();
        buf.write(&[2, 0, 0, 0, 0]);
        assert!(matches!(
            decode_message(&mut buf, 1024),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_oversize_rejected_from_header() {
        let mut buf = ByteBuffer::new();
        buf.write(&[0, 0, 0x10, 0, 0]);
        assert!(matches!(
            decode_message(&mut buf, 1024),
            Err(Error::MessageTooLarge {
                size: 0x100000,
                max: 1024
            })
        ));
    }

    #[test]
    fn test_decode_at_limit() {
        let mut buf = framed(&[7u8; 16], false);
        let msg = decode_message(&mut buf, 16).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 16);
    }
}
