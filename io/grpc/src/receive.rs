//! Inbound side of a stream: reassembles message frames out of DATA
//! payloads and hands them to a consumer thread.

use crate::buffer::ByteBuffer;
use crate::codec;
use crate::compression::Compression;
use crate::error::Error;
use crate::frame;
use crate::metrics::MESSAGES_RECEIVED;
use crate::status::Status;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// One entry of the message queue.
#[derive(Debug)]
enum Item {
    /// Payload and the number of wire bytes it was framed in.
    Message(Bytes, usize),
    End,
    Error(Status),
}

struct Inner {
    buffer: ByteBuffer,
    encoding: Compression,
    /// Dropped on close so the queue disconnects behind the sentinel.
    tx: Option<Sender<Item>>,
    /// DATA bytes written so far.
    received: usize,
    /// Bytes already reported by `take_release`.
    released: usize,
}

/// The receiving half of one gRPC stream.
///
/// The connection thread calls [`write`](Self::write) with DATA payloads;
/// a consumer on another thread iterates [`consume`](Self::consume). Each
/// stream ends with exactly one terminal item: a clean end or an error.
///
/// Bytes of complete messages stay held until the consumer takes them.
/// The connection hands everything else back to the peer's flow-control
/// window through [`take_release`](Self::take_release).
pub struct ReceiveStream {
    inner: Mutex<Inner>,
    rx: Receiver<Item>,
    /// Wire bytes of queued messages not yet taken by the consumer.
    held: AtomicUsize,
    max_message_size: usize,
}

impl ReceiveStream {
    pub fn new(max_message_size: usize, encoding: Compression) -> Self {
        let (tx, rx) = unbounded();
        Self {
            inner: Mutex::new(Inner {
                buffer: ByteBuffer::new(),
                encoding,
                tx: Some(tx),
                received: 0,
                released: 0,
            }),
            rx,
            held: AtomicUsize::new(0),
            max_message_size,
        }
    }

    /// Set the encoding announced by the peer's headers.
    pub fn set_encoding(&self, encoding: Compression) {
        self.inner.lock().encoding = encoding;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().tx.is_none()
    }

    /// Feed one DATA payload. Discarded once the stream is closed.
    ///
    /// Every complete message in the buffer is queued. Framing violations
    /// are returned to the caller; a message that fails to decompress
    /// closes the stream with INTERNAL.
    pub fn write(&self, data: &[u8]) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.received += data.len();
        if inner.tx.is_none() {
            return Ok(());
        }
        inner.buffer.write(data);

        while let Some(message) = frame::decode_message(&mut inner.buffer, self.max_message_size)? {
            let wire_len = frame::HEADER_SIZE + message.payload.len();
            let payload = if message.compressed {
                if inner.encoding.is_identity() {
                    return Err(Error::Protocol(
                        "compressed message on a stream without grpc-encoding".into(),
                    ));
                }
                match inner
                    .encoding
                    .decompress(&message.payload, self.max_message_size)
                {
                    Ok(payload) => Bytes::from(payload),
                    Err(e) => {
                        debug!(error = %e, encoding = %inner.encoding, "decompression failed");
                        let status = Status::internal(format!("failed to decompress message: {}", e));
                        close_locked(&mut inner, Some(status));
                        return Ok(());
                    }
                }
            } else {
                message.payload
            };

            trace!(len = payload.len(), "message received");
            MESSAGES_RECEIVED.increment();
            if let Some(tx) = &inner.tx {
                self.held.fetch_add(wire_len, Ordering::AcqRel);
                let _ = tx.send(Item::Message(payload, wire_len));
            }
        }
        Ok(())
    }

    /// Enqueue the terminal item: a clean end, or `error`.
    ///
    /// Idempotent; only the first call has an effect.
    pub fn close(&self, error: Option<Status>) {
        close_locked(&mut self.inner.lock(), error);
    }

    /// Bytes the peer may send again: everything written since the last
    /// call that is not part of a message still waiting for the consumer.
    pub fn take_release(&self) -> usize {
        let mut inner = self.inner.lock();
        let held = self.held.load(Ordering::Acquire);
        let amount = inner
            .received
            .saturating_sub(held)
            .saturating_sub(inner.released);
        inner.released += amount;
        amount
    }

    /// Next raw payload, blocking until one is available.
    ///
    /// Returns `None` after the clean end, and after the terminal item has
    /// been taken by an earlier call.
    pub fn recv(&self) -> Option<Result<Bytes, Status>> {
        match self.rx.recv() {
            Ok(Item::Message(payload, wire_len)) => {
                self.held.fetch_sub(wire_len, Ordering::AcqRel);
                Some(Ok(payload))
            }
            Ok(Item::Error(status)) => Some(Err(status)),
            Ok(Item::End) | Err(_) => None,
        }
    }

    /// Iterate the stream's messages decoded as `M`.
    pub fn consume<M: prost::Message + Default>(self: &Arc<Self>) -> Streaming<M> {
        Streaming {
            stream: self.clone(),
            done: false,
            _marker: PhantomData,
        }
    }
}

fn close_locked(inner: &mut Inner, error: Option<Status>) {
    if let Some(tx) = inner.tx.take() {
        let item = match error {
            Some(status) => Item::Error(status),
            None => Item::End,
        };
        let _ = tx.send(item);
    }
}

/// Blocking iterator over a stream's decoded messages.
///
/// Yields `Err` at most once, as its final item.
pub struct Streaming<M> {
    stream: Arc<ReceiveStream>,
    done: bool,
    _marker: PhantomData<fn() -> M>,
}

impl<M: prost::Message + Default> Iterator for Streaming<M> {
    type Item = Result<M, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.stream.recv() {
            Some(Ok(payload)) => codec::decode(payload),
            Some(Err(status)) => Err(status),
            None => {
                self.done = true;
                return None;
            }
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;
    use std::thread;

    fn framed(payloads: &[&[u8]], compression: Compression) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        for payload in payloads {
            let body = compression.compress(payload).unwrap();
            frame::encode_message(&body, !compression.is_identity(), &mut buf);
        }
        buf.read_all().to_vec()
    }

    fn drain(stream: &ReceiveStream) -> Vec<Result<Bytes, Status>> {
        std::iter::from_fn(|| stream.recv()).collect()
    }

    #[test]
    fn test_messages_split_across_writes() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        let bytes = framed(&[b"first", b"", b"third"], Compression::Identity);
        for chunk in bytes.chunks(3) {
            stream.write(chunk).unwrap();
        }
        stream.close(None);

        let items: Vec<_> = drain(&stream).into_iter().map(Result::unwrap).collect();
        assert_eq!(items, vec!["first", "", "third"]);
    }

    #[test]
    fn test_reassembly_at_every_split_point() {
        let payloads: [&[u8]; 3] = [b"first", b"", b"third message"];
        let bytes = framed(&payloads, Compression::Identity);
        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let stream = ReceiveStream::new(1024, Compression::Identity);
                stream.write(&bytes[..i]).unwrap();
                stream.write(&bytes[i..j]).unwrap();
                stream.write(&bytes[j..]).unwrap();
                stream.close(None);

                let items: Vec<_> = drain(&stream).into_iter().map(Result::unwrap).collect();
                assert_eq!(items, payloads, "split at {} and {}", i, j);
            }
        }
    }

    #[test]
    fn test_release_waits_for_consumer() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        // 5 + 3 and 5 + 5 wire bytes
        let bytes = framed(&[b"abc", b"defgh"], Compression::Identity);

        // a partial frame goes back to the peer at once
        stream.write(&bytes[..4]).unwrap();
        assert_eq!(stream.take_release(), 4);

        stream.write(&bytes[4..]).unwrap();
        assert_eq!(stream.take_release(), 0);

        assert_eq!(stream.recv().unwrap().unwrap(), "abc");
        assert_eq!(stream.take_release(), 4);
        assert_eq!(stream.recv().unwrap().unwrap(), "defgh");
        assert_eq!(stream.take_release(), 10);
        assert_eq!(stream.take_release(), 0);
    }

    #[test]
    fn test_discarded_bytes_are_released() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        stream.close(Some(Status::cancelled("gone")));
        stream.write(&[0u8; 100]).unwrap();
        assert_eq!(stream.take_release(), 100);
    }

    #[test]
    fn test_close_is_idempotent() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        stream.close(Some(Status::cancelled("first")));
        stream.close(None);
        stream.close(Some(Status::internal("second")));

        let items = drain(&stream);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().code(), Code::Cancelled);
        assert!(stream.recv().is_none());
    }

    #[test]
    fn test_write_after_close_is_ignored() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        stream.close(None);
        stream
            .write(&framed(&[b"late"], Compression::Identity))
            .unwrap();
        assert!(drain(&stream).is_empty());
    }

    #[test]
    fn test_compressed_messages() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        stream.set_encoding(Compression::Gzip);
        stream.write(&framed(&[b"zipped"], Compression::Gzip)).unwrap();
        stream.close(None);
        assert_eq!(drain(&stream)[0].as_ref().unwrap(), "zipped");
    }

    #[test]
    fn test_compressed_flag_without_encoding() {
        let stream = ReceiveStream::new(1024, Compression::Identity);
        let bytes = framed(&[b"zipped"], Compression::Gzip);
        assert!(matches!(stream.write(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bad_compressed_payload_closes_with_internal() {
        let stream = ReceiveStream::new(1024, Compression::Deflate);
        let mut buf = ByteBuffer::new();
        frame::encode_message(b"not zlib", true, &mut buf);
        stream.write(&buf.read_all()).unwrap();

        assert!(stream.is_closed());
        let items = drain(&stream);
        assert_eq!(items[0].as_ref().unwrap_err().code(), Code::Internal);
    }

    #[test]
    fn test_oversize_message() {
        let stream = ReceiveStream::new(4, Compression::Identity);
        let bytes = framed(&[b"too long"], Compression::Identity);
        assert!(matches!(
            stream.write(&bytes),
            Err(Error::MessageTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn test_consume_decodes_and_ends() {
        let stream = Arc::new(ReceiveStream::new(1024, Compression::Identity));
        let writer = stream.clone();
        let handle = thread::spawn(move || {
            for word in ["alpha", "beta"] {
                let payload = codec::EncodeMessage::encode_to_bytes(&word.to_string());
                writer
                    .write(&framed(&[&payload[..]], Compression::Identity))
                    .unwrap();
            }
            writer.close(Some(Status::not_found("gone")));
        });

        let items: Vec<Result<String, Status>> = stream.consume().collect();
        handle.join().unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "alpha");
        assert_eq!(items[1].as_deref().unwrap(), "beta");
        assert_eq!(items[2].as_ref().unwrap_err().code(), Code::NotFound);

        // already drained
        assert_eq!(stream.consume::<String>().count(), 0);
    }

    #[test]
    fn test_concurrent_writers_and_reader() {
        let stream = Arc::new(ReceiveStream::new(1024, Compression::Identity));
        let frame_bytes = framed(&[b"x"], Compression::Identity);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stream = stream.clone();
                let bytes = frame_bytes.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        stream.write(&bytes).unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let stream = stream.clone();
            thread::spawn(move || drain(&stream).len())
        };

        for writer in writers {
            writer.join().unwrap();
        }
        stream.close(None);
        assert_eq!(reader.join().unwrap(), 1000);
    }
}
