//! The per-connection event loop.
//!
//! A [`ConnectionManager`] owns one HTTP/2 engine and the stream objects of
//! every call multiplexed over it. Only the connection thread touches the
//! engine or the stream maps; handler, producer, and consumer threads talk
//! to a call exclusively through its [`ReceiveStream`] and [`SendStream`].
//!
//! Role-specific behavior (opening calls on a client, dispatching handlers
//! on a server) lives behind the [`Endpoint`] trait.

pub(crate) mod client;
pub(crate) mod server;

use crate::error::Error;
use crate::metrics::{BYTES_RECEIVED, BYTES_SENT, CONNECTIONS_ACTIVE, PROTOCOL_ERRORS, STREAM_RESETS};
use crate::receive::ReceiveStream;
use crate::send::SendStream;
use crate::status::Status;
use bytes::Bytes;
use http2::{
    Connection, ConnectionError, ConnectionSettings, ErrorCode, Event, HeaderField, Role, StreamId,
};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    /// Waiting for the peer's SETTINGS.
    Connecting,
    Open,
    /// GOAWAY sent or received; in-flight streams drain, new ones are refused.
    Closing,
    Closed,
}

/// Engine plus stream maps: the state every role shares.
pub(crate) struct Core {
    pub engine: Connection,
    pub recv: HashMap<StreamId, Arc<ReceiveStream>>,
    pub send: HashMap<StreamId, Arc<SendStream>>,
    pub state: LinkState,
    /// Hold headers until the first message is ready.
    pub defer_headers: bool,
    /// Peer address, for logging.
    pub peer: String,
}

impl Core {
    pub fn new(role: Role, settings: ConnectionSettings, defer_headers: bool, peer: String) -> Self {
        let mut engine = Connection::new(role, settings);
        // stream windows reopen as consumers take messages
        engine.set_auto_release(false);
        Self {
            engine,
            recv: HashMap::new(),
            send: HashMap::new(),
            state: LinkState::Connecting,
            defer_headers,
            peer,
        }
    }

    /// No stream objects left.
    pub fn is_idle(&self) -> bool {
        self.recv.is_empty() && self.send.is_empty()
    }

    pub fn reset(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        STREAM_RESETS.increment();
        if let Err(e) = self.engine.reset_stream(stream_id, error_code) {
            debug!(%stream_id, error = %e, "could not reset stream");
        }
    }

    /// Close both sides of a stream with `status` and evict them,
    /// optionally resetting the HTTP/2 stream first.
    ///
    /// Returns false if neither side was still mapped.
    pub fn fail_stream(
        &mut self,
        stream_id: StreamId,
        reset: Option<ErrorCode>,
        status: Status,
    ) -> bool {
        if let Some(error_code) = reset {
            self.reset(stream_id, error_code);
        }
        let recv = self.recv.remove(&stream_id);
        let send = self.send.remove(&stream_id);
        let live = recv.is_some() || send.is_some();
        if let Some(recv) = recv {
            recv.close(Some(status.clone()));
        }
        if let Some(send) = send {
            send.abort(status);
        }
        live
    }

    /// Log and count a peer's protocol violation, then reset the stream.
    pub fn protocol_violation(&mut self, stream_id: StreamId, reason: &str) {
        error!(peer = %self.peer, %stream_id, reason, "protocol violation");
        PROTOCOL_ERRORS.increment();
        self.fail_stream(
            stream_id,
            Some(ErrorCode::ProtocolError),
            Status::internal(reason.to_string()),
        );
    }
}

/// Role hooks driven by the [`ConnectionManager`].
///
/// Events a role never expects default to a protocol violation.
pub(crate) trait Endpoint {
    /// Called once per loop pass, before pending sends are advanced.
    fn poll(&mut self, core: &mut Core);

    /// No calls tracked beyond the stream maps.
    fn is_idle(&self) -> bool {
        true
    }

    fn on_request(
        &mut self,
        core: &mut Core,
        stream_id: StreamId,
        _headers: Vec<HeaderField>,
        _end_stream: bool,
    ) {
        core.protocol_violation(stream_id, "request headers received by a client");
    }

    fn on_response(
        &mut self,
        core: &mut Core,
        stream_id: StreamId,
        _headers: Vec<HeaderField>,
        _end_stream: bool,
    ) {
        core.protocol_violation(stream_id, "response headers received by a server");
    }

    fn on_trailers(&mut self, core: &mut Core, stream_id: StreamId, headers: Vec<HeaderField>);

    /// The peer half-closed; runs before the receive side is closed.
    fn on_stream_ended(&mut self, _core: &mut Core, _stream_id: StreamId) {}

    /// A stream was failed and evicted by the shared loop.
    fn on_stream_failed(&mut self, _stream_id: StreamId, _status: &Status) {}

    /// The send side reached a terminal error. It has been recorded in the
    /// stream's trailers.
    fn on_send_error(&mut self, core: &mut Core, stream_id: StreamId, status: Status);

    /// The send side is exhausted.
    fn finish_send(&mut self, core: &mut Core, stream_id: StreamId);

    fn on_goaway(&mut self, _core: &mut Core, _last_stream_id: StreamId, _error_code: ErrorCode) {}

    /// The connection is gone; every mapped stream has already been failed.
    fn on_terminated(&mut self, _status: &Status) {}
}

/// Drives one HTTP/2 connection for either role.
pub(crate) struct ConnectionManager<E> {
    core: Core,
    endpoint: E,
}

impl<E: Endpoint> ConnectionManager<E> {
    pub fn new(core: Core, endpoint: E) -> Self {
        Self { core, endpoint }
    }

    /// Run the event loop on `socket` until the connection closes.
    pub fn run(mut self, mut socket: TcpStream, poll_interval: Duration) -> Result<(), Error> {
        CONNECTIONS_ACTIVE.increment();
        let result = self.drive(&mut socket, poll_interval);
        CONNECTIONS_ACTIVE.decrement();
        let _ = socket.shutdown(Shutdown::Both);
        result
    }

    fn drive(&mut self, socket: &mut TcpStream, poll_interval: Duration) -> Result<(), Error> {
        socket.set_read_timeout(Some(poll_interval))?;
        socket.set_nodelay(true)?;

        self.start();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if let Err(e) = self.flush_to(socket) {
                self.lost(Status::unavailable("connection lost"));
                return Err(e.into());
            }
            if self.finished() {
                debug!(peer = %self.core.peer, "connection closed");
                return Ok(());
            }

            match socket.read(&mut buf) {
                Ok(0) => {
                    debug!(peer = %self.core.peer, "peer closed the connection");
                    self.lost(Status::unavailable("connection lost"));
                    return Ok(());
                }
                Ok(n) => self.receive(&buf[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(peer = %self.core.peer, error = %e, "connection read failed");
                    self.lost(Status::unavailable("connection lost"));
                    return Err(e.into());
                }
            }

            self.idle();
        }
    }

    fn flush_to(&mut self, socket: &mut TcpStream) -> io::Result<()> {
        if self.core.engine.has_data_to_send() {
            let data = self.take_outbound();
            socket.write_all(&data)?;
        }
        Ok(())
    }

    /// Queue the connection preface and settings.
    pub fn start(&mut self) {
        self.core.engine.initiate_connection();
    }

    /// Bytes queued for the peer.
    pub fn take_outbound(&mut self) -> Bytes {
        self.core.engine.data_to_send()
    }

    /// Feed bytes read from the peer.
    pub fn receive(&mut self, data: &[u8]) {
        match self.core.engine.receive_data(data) {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                }
            }
            Err(e) => {
                warn!(peer = %self.core.peer, error = %e, "connection error");
                let status = Status::from(Error::from(e));
                self.lost(status);
            }
        }
    }

    /// Maintenance pass: role polling, then every pending send.
    pub fn idle(&mut self) {
        if self.core.state == LinkState::Closed {
            return;
        }
        self.endpoint.poll(&mut self.core);

        for (stream_id, recv) in &self.core.recv {
            let consumed = recv.take_release();
            if consumed > 0 {
                self.core.engine.release_capacity(*stream_id, consumed);
            }
        }

        let ids: Vec<StreamId> = self.core.send.keys().copied().collect();
        for stream_id in ids {
            self.send_pending(stream_id);
        }

        if self.core.state == LinkState::Closing && self.drained() {
            debug!(peer = %self.core.peer, "connection drained");
            self.core.state = LinkState::Closed;
        }
    }

    fn drained(&self) -> bool {
        self.core.is_idle() && self.endpoint.is_idle()
    }

    /// The loop has nothing left to do.
    pub fn finished(&self) -> bool {
        match self.core.state {
            LinkState::Closed => true,
            LinkState::Closing => self.drained(),
            LinkState::Connecting | LinkState::Open => false,
        }
    }

    fn handle_event(&mut self, event: Event) {
        trace!(peer = %self.core.peer, ?event, "event");
        match event {
            Event::RequestReceived {
                stream_id,
                headers,
                end_stream,
            } => {
                self.endpoint
                    .on_request(&mut self.core, stream_id, headers, end_stream);
                self.send_pending(stream_id);
            }
            Event::ResponseReceived {
                stream_id,
                headers,
                end_stream,
            } => {
                self.endpoint
                    .on_response(&mut self.core, stream_id, headers, end_stream);
            }
            Event::TrailersReceived { stream_id, headers } => {
                self.endpoint.on_trailers(&mut self.core, stream_id, headers);
            }
            Event::DataReceived {
                stream_id,
                data,
                flow_len,
            } => {
                let padding = (flow_len as usize).saturating_sub(data.len());
                if padding > 0 {
                    self.core.engine.release_capacity(stream_id, padding);
                }
                self.on_data(stream_id, &data);
            }
            Event::StreamEnded { stream_id } => {
                self.endpoint.on_stream_ended(&mut self.core, stream_id);
                if let Some(recv) = self.core.recv.remove(&stream_id) {
                    recv.close(None);
                }
                // the request ending may unblock a deferred response
                self.send_pending(stream_id);
            }
            Event::StreamReset {
                stream_id,
                error_code,
            } => {
                debug!(peer = %self.core.peer, %stream_id, %error_code, "stream reset by peer");
                STREAM_RESETS.increment();
                self.fail_stream(stream_id, None, Status::from_reset(error_code));
            }
            Event::WindowUpdated { stream_id, .. } => {
                if stream_id.is_connection_level() {
                    let ids: Vec<StreamId> = self.core.send.keys().copied().collect();
                    for stream_id in ids {
                        self.send_pending(stream_id);
                    }
                } else {
                    self.send_pending(stream_id);
                }
            }
            Event::RemoteSettingsChanged { .. } | Event::SettingsAcknowledged => {
                if self.core.state == LinkState::Connecting {
                    debug!(peer = %self.core.peer, "connection open");
                    self.core.state = LinkState::Open;
                }
            }
            Event::PingAcknowledged { .. } => {}
            Event::ConnectionTerminated {
                error_code,
                last_stream_id,
                ..
            } => {
                info!(peer = %self.core.peer, %error_code, %last_stream_id, "peer sent GOAWAY");
                if self.core.state != LinkState::Closed {
                    self.core.state = LinkState::Closing;
                }
                self.endpoint
                    .on_goaway(&mut self.core, last_stream_id, error_code);
            }
        }
    }

    fn on_data(&mut self, stream_id: StreamId, data: &[u8]) {
        BYTES_RECEIVED.add(data.len() as u64);
        let Some(recv) = self.core.recv.get(&stream_id).cloned() else {
            debug!(peer = %self.core.peer, %stream_id, "DATA for an unknown stream");
            PROTOCOL_ERRORS.increment();
            self.core.reset(stream_id, ErrorCode::ProtocolError);
            return;
        };
        if let Err(e) = recv.write(data) {
            warn!(peer = %self.core.peer, %stream_id, error = %e, "malformed message stream");
            PROTOCOL_ERRORS.increment();
            self.fail_stream(stream_id, Some(ErrorCode::ProtocolError), Status::from(e));
        }
    }

    fn fail_stream(&mut self, stream_id: StreamId, reset: Option<ErrorCode>, status: Status) {
        if self.core.fail_stream(stream_id, reset, status.clone()) {
            self.endpoint.on_stream_failed(stream_id, &status);
        }
    }

    fn send_failed(&mut self, stream_id: StreamId, err: ConnectionError) {
        debug!(peer = %self.core.peer, %stream_id, error = %err, "send failed");
        self.fail_stream(
            stream_id,
            Some(ErrorCode::InternalError),
            Status::from(Error::from(err)),
        );
    }

    /// Move whatever the stream's window allows onto the connection.
    fn send_pending(&mut self, stream_id: StreamId) {
        let Some(send) = self.core.send.get(&stream_id).cloned() else {
            return;
        };

        if let Some(headers) = send.headers_to_send(self.core.defer_headers)
            && let Err(e) = self.core.engine.send_headers(stream_id, &headers, false)
        {
            self.send_failed(stream_id, e);
            return;
        }

        if send.headers_sent() {
            let window = self.core.engine.local_flow_control_window(stream_id);
            let max_frame = self.core.engine.max_outbound_frame_size();
            match send.read(window, max_frame) {
                Ok(chunks) => {
                    for chunk in chunks {
                        if let Err(e) = self.core.engine.send_data(stream_id, &chunk, false) {
                            self.send_failed(stream_id, e);
                            return;
                        }
                        BYTES_SENT.add(chunk.len() as u64);
                    }
                }
                Err(status) => {
                    self.endpoint.on_send_error(&mut self.core, stream_id, status);
                    return;
                }
            }
        } else if let Err(status) = send.flush_queue_to_buffer() {
            self.endpoint.on_send_error(&mut self.core, stream_id, status);
            return;
        }

        if send.is_exhausted() {
            self.endpoint.finish_send(&mut self.core, stream_id);
        }
    }

    /// The transport is gone: fail every live stream with `status`.
    fn lost(&mut self, status: Status) {
        self.core.state = LinkState::Closed;
        let mut ids: Vec<StreamId> = self.core.recv.keys().copied().collect();
        ids.extend(self.core.send.keys().copied());
        for stream_id in ids {
            self.fail_stream(stream_id, None, status.clone());
        }
        self.endpoint.on_terminated(&status);
    }
}
