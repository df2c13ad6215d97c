//! Outbound side of a stream: queues application messages and hands
//! framed bytes to the connection under flow control.

use crate::buffer::ByteBuffer;
use crate::codec::EncodeMessage;
use crate::compression::Compression;
use crate::error::Error;
use crate::frame;
use crate::metadata::Metadata;
use crate::metrics::MESSAGES_SENT;
use crate::status::Status;
use bytes::Bytes;
use http2::HeaderField;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// `populate` waits while this many messages are queued unframed.
pub const HIGH_WATER_MESSAGES: usize = 32;

/// `populate` waits while this many framed bytes are unsent.
pub const HIGH_WATER_BYTES: usize = 64 * 1024;

enum Outbound {
    Message(Box<dyn EncodeMessage>),
    /// Terminal error; nothing queued after it is sent.
    Error(Status),
}

struct Inner {
    queue: VecDeque<Outbound>,
    buffer: ByteBuffer,
    headers: Metadata,
    trailers: Metadata,
    closed: bool,
    headers_sent: bool,
    trailers_sent: bool,
    encoding: Compression,
}

/// The sending half of one gRPC stream.
///
/// Producers [`put`](Self::put) messages from any thread. The connection
/// thread pulls framed bytes with [`read`](Self::read), bounded by the
/// stream's flow-control window, and sends headers and trailers when this
/// stream says they are due.
///
/// [`put`](Self::put) never blocks. [`populate`](Self::populate) waits
/// whenever the pending data reaches the high-water marks, so a producer
/// runs at most that far ahead of what the peer has accepted.
pub struct SendStream {
    inner: Mutex<Inner>,
    /// Signalled when pending data shrinks or the stream closes.
    space: Condvar,
}

impl SendStream {
    /// Messages are compressed with `encoding` unless it is identity.
    pub fn new(encoding: Compression) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                buffer: ByteBuffer::new(),
                headers: Metadata::new(),
                trailers: Metadata::new(),
                closed: false,
                headers_sent: false,
                trailers_sent: false,
                encoding,
            }),
            space: Condvar::new(),
        }
    }

    pub fn encoding(&self) -> Compression {
        self.inner.lock().encoding
    }

    /// Queue one message.
    pub fn put(&self, message: impl EncodeMessage + 'static) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::StreamClosed);
        }
        inner.queue.push_back(Outbound::Message(Box::new(message)));
        Ok(())
    }

    /// Queue every message of `items`, then close.
    ///
    /// Blocks between items while the stream is above its high-water
    /// marks. An `Err` item closes the stream with that status. Stops
    /// early if the stream is closed underneath it.
    pub fn populate<M, I>(&self, items: I)
    where
        M: EncodeMessage + 'static,
        I: IntoIterator<Item = Result<M, Status>>,
    {
        for item in items {
            if !self.wait_for_space() {
                return;
            }
            match item {
                Ok(message) => {
                    if self.put(message).is_err() {
                        return;
                    }
                }
                Err(status) => {
                    self.close(Some(status));
                    return;
                }
            }
        }
        self.close(None);
    }

    /// Block until pending data is below the high-water marks. Returns
    /// false if the stream closed instead.
    fn wait_for_space(&self) -> bool {
        let mut inner = self.inner.lock();
        while !inner.closed && inner.is_full() {
            self.space.wait(&mut inner);
        }
        !inner.closed
    }

    /// Mark the end of the messages, optionally ending with `error`.
    ///
    /// Idempotent; only the first call has an effect.
    pub fn close(&self, error: Option<Status>) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(status) = error {
            inner.queue.push_back(Outbound::Error(status));
        }
        self.space.notify_all();
    }

    /// Drop everything not yet sent and end with `status`.
    ///
    /// No-op once trailers went out.
    pub fn abort(&self, status: Status) {
        let mut inner = self.inner.lock();
        if inner.trailers_sent {
            return;
        }
        debug!(%status, "send stream aborted");
        inner.queue.clear();
        inner.buffer.clear();
        inner.closed = true;
        inner.queue.push_back(Outbound::Error(status));
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Record `status` in the trailers.
    pub fn set_status(&self, status: &Status) {
        status.write_trailers(&mut self.inner.lock().trailers);
    }

    pub fn update_headers(&self, f: impl FnOnce(&mut Metadata)) {
        f(&mut self.inner.lock().headers);
    }

    pub fn update_trailers(&self, f: impl FnOnce(&mut Metadata)) {
        f(&mut self.inner.lock().trailers);
    }

    pub fn headers_sent(&self) -> bool {
        self.inner.lock().headers_sent
    }

    /// The header block, if it is due.
    ///
    /// With `defer` set, headers wait until a message is queued or framed.
    /// Marks the headers sent when it returns them.
    pub fn headers_to_send(&self, defer: bool) -> Option<Vec<HeaderField>> {
        let mut inner = self.inner.lock();
        if inner.headers_sent {
            return None;
        }
        let has_message = !inner.buffer.is_empty()
            || inner
                .queue
                .iter()
                .any(|item| matches!(item, Outbound::Message(_)));
        if defer && !has_message {
            return None;
        }
        inner.headers_sent = true;
        Some(inner.headers.for_wire())
    }

    /// The trailer block, once. A missing `grpc-status` is filled in as OK.
    pub fn trailers_to_send(&self) -> Option<Vec<HeaderField>> {
        let mut inner = self.inner.lock();
        if inner.trailers_sent {
            return None;
        }
        inner.trailers_sent = true;
        if !inner.trailers.contains_key("grpc-status") {
            Status::ok().write_trailers(&mut inner.trailers);
        }
        Some(inner.trailers.for_wire())
    }

    /// Headers and trailers merged into one block, for a response that
    /// ends before any header block was sent.
    pub fn trailers_only_to_send(&self) -> Vec<HeaderField> {
        let mut inner = self.inner.lock();
        inner.headers_sent = true;
        inner.trailers_sent = true;
        if !inner.trailers.contains_key("grpc-status") {
            Status::ok().write_trailers(&mut inner.trailers);
        }
        let mut merged = inner.headers.clone();
        merged.extend(&inner.trailers);
        merged.for_wire()
    }

    /// Status recorded in the trailers so far.
    pub fn status(&self) -> Option<Status> {
        Status::from_trailers(&self.inner.lock().trailers)
    }

    /// Frame queued messages into the byte buffer.
    ///
    /// On reaching a queued error: if framed bytes are still pending, the
    /// error stays queued behind them; otherwise it is written into the
    /// trailers and returned.
    pub fn flush_queue_to_buffer(&self) -> Result<(), Status> {
        let result = self.inner.lock().flush();
        self.space.notify_all();
        result
    }

    /// Take up to `max` pending bytes in chunks of at most `chunk` bytes.
    ///
    /// Returns `Err` only when a terminal error is reached and nothing was
    /// yielded; the error is then also recorded in the trailers.
    pub fn read(&self, max: usize, chunk: usize) -> Result<Vec<Bytes>, Status> {
        let chunk = chunk.max(1);
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let mut total: usize = 0;

        while total.saturating_add(chunk) <= max && inner.buffer.len() >= chunk {
            out.push(inner.buffer.read(chunk));
            total += chunk;
        }

        if !inner.queue.is_empty()
            && let Err(status) = inner.flush()
            && out.is_empty()
        {
            drop(inner);
            self.space.notify_all();
            return Err(status);
        }

        while total < max && !inner.buffer.is_empty() {
            let n = chunk.min(max - total);
            let bytes = inner.buffer.read(n);
            total += bytes.len();
            out.push(bytes);
        }
        drop(inner);
        self.space.notify_all();
        Ok(out)
    }

    /// Closed with nothing left to frame or send.
    pub fn is_exhausted(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.queue.is_empty() && inner.buffer.is_empty()
    }
}

impl Inner {
    fn is_full(&self) -> bool {
        self.queue.len() >= HIGH_WATER_MESSAGES || self.buffer.len() >= HIGH_WATER_BYTES
    }

    fn flush(&mut self) -> Result<(), Status> {
        while let Some(item) = self.queue.pop_front() {
            match item {
                Outbound::Message(message) => {
                    let payload = message.encode_to_bytes();
                    if self.encoding.is_identity() {
                        frame::encode_message(&payload, false, &mut self.buffer);
                    } else {
                        match self.encoding.compress(&payload) {
                            Ok(body) => frame::encode_message(&body, true, &mut self.buffer),
                            Err(e) => {
                                return Err(self.fail(Status::internal(format!(
                                    "failed to compress message: {}",
                                    e
                                ))));
                            }
                        }
                    }
                    trace!(len = payload.len(), "message framed");
                    MESSAGES_SENT.increment();
                }
                Outbound::Error(status) => {
                    if !self.buffer.is_empty() {
                        self.queue.push_front(Outbound::Error(status));
                        return Ok(());
                    }
                    return Err(self.fail(status));
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, status: Status) -> Status {
        self.queue.clear();
        self.buffer.clear();
        self.closed = true;
        status.write_trailers(&mut self.trailers);
        status
    }
}
