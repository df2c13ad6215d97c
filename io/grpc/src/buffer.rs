//! Growable byte FIFO shared by the send and receive paths.

use bytes::{Bytes, BytesMut};

/// Append-at-tail, consume-from-head byte queue.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn write(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Up to `len` bytes from the head, without consuming them.
    pub fn peek(&self, len: usize) -> &[u8] {
        &self.inner[..len.min(self.inner.len())]
    }

    /// Remove and return up to `len` bytes from the head.
    pub fn read(&mut self, len: usize) -> Bytes {
        let len = len.min(self.inner.len());
        self.inner.split_to(len).freeze()
    }

    pub fn read_all(&mut self) -> Bytes {
        self.inner.split().freeze()
    }

    /// Drop up to `len` bytes from the head.
    pub fn discard(&mut self, len: usize) {
        let len = len.min(self.inner.len());
        let _ = self.inner.split_to(len);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut buf = ByteBuffer::new();
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.len(), 11);

        assert_eq!(&buf.read(5)[..], b"hello");
        assert_eq!(buf.peek(3), b" wo");
        assert_eq!(buf.len(), 6);

        buf.discard(1);
        assert_eq!(&buf.read_all()[..], b"world");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_short_reads() {
        let mut buf = ByteBuffer::new();
        buf.write(b"abc");
        assert_eq!(buf.peek(10), b"abc");
        assert_eq!(&buf.read(10)[..], b"abc");
        assert_eq!(buf.read(1).len(), 0);
        buf.discard(5);
        assert!(buf.is_empty());
    }
}
