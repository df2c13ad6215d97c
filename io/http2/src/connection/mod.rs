//! HTTP/2 connection state machine.
//!
//! [`Connection`] never touches a socket. Bytes read from the peer go in
//! through [`Connection::receive_data`], which returns the [`Event`]s they
//! produced; bytes to write come out of [`Connection::data_to_send`]. The
//! same engine serves both ends of a connection, selected by [`Role`].
//!
//! The engine takes care of:
//! - Connection preface and settings exchange
//! - Stream lifecycle and HEADERS/CONTINUATION reassembly
//! - Flow control, with WINDOW_UPDATEs sent automatically
//! - PING acknowledgment
//! - GOAWAY, after which in-flight streams keep working

mod flow_control;
mod settings;
mod stream;

pub use flow_control::{FlowControl, WindowOverflow};
pub use settings::ConnectionSettings;
pub use stream::{Stream, StreamState};

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::frame::{
    CONNECTION_PREFACE, ContinuationFrame, DEFAULT_INITIAL_WINDOW_SIZE, DataFrame, ErrorCode, Frame,
    FrameDecoder, FrameEncoder, FrameError, GoAwayFrame, HeadersFrame, MAX_WINDOW_SIZE, PingFrame,
    RstStreamFrame, Setting, SettingId, SettingsFrame, StreamId, WindowUpdateFrame,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};

/// Largest stream identifier (2^31 - 1).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Cap on a reassembled HEADERS + CONTINUATION block.
const MAX_HEADER_BLOCK_SIZE: usize = 1 << 20;

/// Which end of the connection this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `initiate_connection` has not been called yet.
    Idle,
    /// Server side, waiting for the client preface.
    AwaitingPreface,
    Open,
    /// A GOAWAY was sent or received. Existing streams continue; new
    /// locally-initiated streams are refused.
    Closing,
    /// A connection error was detected or sent. Nothing more is processed.
    Closed,
}

/// Something the peer did, as reported by [`Connection::receive_data`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Server role: a client opened a stream.
    RequestReceived {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Client role: the first header block on a stream we opened. With
    /// `end_stream` set this is a trailers-only response.
    ResponseReceived {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// A second header block; always ends the stream.
    TrailersReceived {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
    },
    DataReceived {
        stream_id: StreamId,
        data: Bytes,
        /// Bytes charged against flow control, padding included.
        flow_len: u32,
    },
    /// The peer sent END_STREAM. Always follows the event for the frame
    /// that carried the flag.
    StreamEnded { stream_id: StreamId },
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// Send window grew; stream 0 means the connection window.
    WindowUpdated { stream_id: StreamId, increment: u32 },
    /// The peer sent SETTINGS. `changed` lists only values that differ from
    /// what was in effect before.
    RemoteSettingsChanged { changed: Vec<Setting> },
    SettingsAcknowledged,
    PingAcknowledged { data: [u8; 8] },
    /// The peer sent GOAWAY.
    ConnectionTerminated {
        error_code: ErrorCode,
        last_stream_id: StreamId,
        debug_data: Bytes,
    },
}

/// Errors from the connection.
///
/// Errors returned by [`Connection::receive_data`] are fatal: a GOAWAY
/// carrying [`ConnectionError::error_code`] has already been queued and the
/// connection is [`ConnectionState::Closed`]. Errors from the send methods
/// only reject that call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Hpack(#[from] HpackError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("flow control error: {0}")]
    FlowControl(String),
    #[error("stream {0} cannot send")]
    StreamClosed(StreamId),
    #[error("{requested} bytes exceed the {available} byte send window")]
    WindowExceeded { requested: usize, available: usize },
    #[error("new stream refused: {0}")]
    Refused(&'static str),
    #[error("connection is closed")]
    Closed,
}

impl ConnectionError {
    /// Error code for the GOAWAY or RST_STREAM this error warrants.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ConnectionError::Frame(e) => e.error_code(),
            ConnectionError::Hpack(_) => ErrorCode::CompressionError,
            ConnectionError::Protocol(_) => ErrorCode::ProtocolError,
            ConnectionError::FlowControl(_) | ConnectionError::WindowExceeded { .. } => {
                ErrorCode::FlowControlError
            }
            ConnectionError::StreamClosed(_) => ErrorCode::StreamClosed,
            ConnectionError::Refused(_) => ErrorCode::RefusedStream,
            ConnectionError::Closed => ErrorCode::NoError,
        }
    }
}

fn protocol(msg: &str) -> ConnectionError {
    ConnectionError::Protocol(msg.to_string())
}

/// A header block split across HEADERS and CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaders {
    stream_id: StreamId,
    end_stream: bool,
    block: BytesMut,
}

/// Sans-IO HTTP/2 connection for either role.
pub struct Connection {
    role: Role,
    state: ConnectionState,
    /// Settings we advertise.
    local_settings: ConnectionSettings,
    local_settings_acked: bool,
    /// Settings the peer has announced; protocol defaults until then.
    remote_settings: ConnectionSettings,
    remote_settings_received: bool,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    /// Streams that are not yet closed in both directions.
    streams: HashMap<StreamId, Stream>,
    /// Next identifier for a locally-initiated stream.
    next_stream_id: u32,
    highest_remote_stream_id: StreamId,
    send_window: FlowControl,
    recv_window: FlowControl,
    continuation: Option<PendingHeaders>,
    goaway_received: Option<StreamId>,
    /// Stream receive windows reopen as DATA arrives; otherwise only
    /// through `release_capacity`.
    auto_release: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    pub fn new(role: Role, settings: ConnectionSettings) -> Self {
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(settings.max_frame_size);

        Self {
            role,
            state: ConnectionState::Idle,
            local_settings: settings,
            local_settings_acked: false,
            remote_settings: ConnectionSettings::protocol_defaults(),
            remote_settings_received: false,
            decoder,
            encoder: FrameEncoder::new(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::new(),
            streams: HashMap::new(),
            next_stream_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            highest_remote_stream_id: StreamId::CONNECTION,
            send_window: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            continuation: None,
            goaway_received: None,
            auto_release: true,
            read_buf: BytesMut::with_capacity(16384),
            write_buf: BytesMut::with_capacity(16384),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Choose whether stream receive windows are replenished on receipt.
    ///
    /// When disabled, each stream's window only reopens as the caller
    /// reports consumed bytes through [`release_capacity`](Self::release_capacity),
    /// so a slow reader stops its peer after one window. The connection
    /// window is always replenished on receipt.
    pub fn set_auto_release(&mut self, enabled: bool) {
        self.auto_release = enabled;
    }

    /// Return `amount` received bytes of `stream_id` to the peer.
    ///
    /// A WINDOW_UPDATE is queued once enough has been released. Ignored for
    /// streams that are gone or no longer receiving.
    pub fn release_capacity(&mut self, stream_id: StreamId, amount: usize) {
        let Some(stream) = self.streams.get_mut(&stream_id).filter(|s| s.can_recv()) else {
            return;
        };
        let window = stream.recv_window_mut();
        window.release(amount.min(MAX_WINDOW_SIZE as usize) as u32);
        if let Some(increment) = window.take_update() {
            trace!(%stream_id, increment, "stream capacity released");
            self.encoder.encode_window_update(
                &WindowUpdateFrame {
                    stream_id,
                    increment,
                },
                &mut self.write_buf,
            );
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_settings(&self) -> &ConnectionSettings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &ConnectionSettings {
        &self.remote_settings
    }

    /// Last stream id from a received GOAWAY, if any.
    pub fn goaway_received(&self) -> Option<StreamId> {
        self.goaway_received
    }

    /// Number of streams not yet closed in both directions.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(&stream_id).map(Stream::state)
    }

    /// Queue the connection preface (client) and our SETTINGS.
    pub fn initiate_connection(&mut self) {
        if self.state != ConnectionState::Idle {
            return;
        }

        if self.role == Role::Client {
            self.write_buf.extend_from_slice(CONNECTION_PREFACE);
        }
        let settings = SettingsFrame {
            ack: false,
            settings: self.local_settings.to_settings(),
        };
        self.encoder.encode_settings(&settings, &mut self.write_buf);

        // SETTINGS do not cover the connection window; grow it explicitly
        let initial = self.local_settings.initial_window_size;
        if initial > DEFAULT_INITIAL_WINDOW_SIZE {
            self.encoder.encode_window_update(
                &WindowUpdateFrame {
                    stream_id: StreamId::CONNECTION,
                    increment: initial - DEFAULT_INITIAL_WINDOW_SIZE,
                },
                &mut self.write_buf,
            );
            self.recv_window = FlowControl::new(initial);
        }

        self.state = match self.role {
            Role::Client => ConnectionState::Open,
            Role::Server => ConnectionState::AwaitingPreface,
        };
        debug!(role = ?self.role, "connection initiated");
    }

    /// Feed bytes read from the peer.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, ConnectionError> {
        match self.state {
            ConnectionState::Idle => return Err(protocol("connection not initiated")),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            _ => {}
        }

        self.read_buf.extend_from_slice(data);
        let mut events = Vec::new();
        match self.process(&mut events) {
            Ok(()) => Ok(events),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Take everything queued for the peer.
    pub fn data_to_send(&mut self) -> Bytes {
        self.write_buf.split().freeze()
    }

    pub fn has_data_to_send(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Identifier the next locally-initiated stream must use.
    pub fn get_next_available_stream_id(&self) -> Result<StreamId, ConnectionError> {
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(ConnectionError::Refused("stream identifiers exhausted"));
        }
        Ok(StreamId::new(self.next_stream_id))
    }

    /// Send a header block, opening the stream if it is new.
    ///
    /// The block is split into HEADERS and CONTINUATION frames as the
    /// peer's max frame size requires.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        self.check_can_send()?;
        match self.streams.get(&stream_id) {
            Some(stream) if !stream.can_send() => {
                return Err(ConnectionError::StreamClosed(stream_id));
            }
            Some(_) => {}
            None => self.open_local_stream(stream_id)?,
        }

        let mut block = Vec::new();
        self.hpack_encoder.encode(headers, &mut block);
        self.encoder
            .encode_header_block(stream_id, &block, end_stream, &mut self.write_buf);
        trace!(%stream_id, fields = headers.len(), end_stream, "sent headers");

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.open();
        }
        if end_stream {
            self.local_end_stream(stream_id);
        }
        Ok(())
    }

    /// Send `data` on a stream, split at the max frame size.
    ///
    /// Fails without sending anything if `data` exceeds
    /// [`local_flow_control_window`](Self::local_flow_control_window).
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        self.check_can_send()?;
        let available = match self.streams.get(&stream_id) {
            Some(stream) if stream.can_send() => self
                .send_window
                .available()
                .min(stream.send_window().available()),
            _ => return Err(ConnectionError::StreamClosed(stream_id)),
        };
        if data.len() > available {
            return Err(ConnectionError::WindowExceeded {
                requested: data.len(),
                available,
            });
        }

        if data.is_empty() {
            self.encoder
                .encode_data(stream_id, &[], end_stream, &mut self.write_buf);
        }
        let mut chunks = data.chunks(self.encoder.max_frame_size() as usize).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.encoder
                .encode_data(stream_id, chunk, end_stream && last, &mut self.write_buf);
        }

        let len = data.len() as u32;
        self.send_window.consume(len);
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_window_mut().consume(len);
        }
        if end_stream {
            self.local_end_stream(stream_id);
        }
        Ok(())
    }

    /// Half-close a stream with an empty DATA frame.
    pub fn end_stream(&mut self, stream_id: StreamId) -> Result<(), ConnectionError> {
        self.send_data(stream_id, &[], true)
    }

    /// Abort a stream. Streams that are already gone are left alone.
    pub fn reset_stream(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        if self.streams.remove(&stream_id).is_some() {
            debug!(%stream_id, %error_code, "resetting stream");
            self.queue_rst(stream_id, error_code);
        }
        Ok(())
    }

    /// Send GOAWAY. With `NoError` the connection drains; any other code
    /// closes it outright.
    pub fn close_connection(&mut self, error_code: ErrorCode) {
        if self.state == ConnectionState::Closed {
            return;
        }
        debug!(%error_code, last_stream_id = %self.highest_remote_stream_id, "sending GOAWAY");
        self.encoder.encode_goaway(
            &GoAwayFrame {
                last_stream_id: self.highest_remote_stream_id,
                error_code,
                debug_data: Bytes::new(),
            },
            &mut self.write_buf,
        );
        self.state = if error_code == ErrorCode::NoError {
            ConnectionState::Closing
        } else {
            ConnectionState::Closed
        };
    }

    pub fn ping(&mut self, data: [u8; 8]) {
        self.encoder
            .encode_ping(&PingFrame { ack: false, data }, &mut self.write_buf);
    }

    /// Bytes that can be sent on a stream right now: the smaller of the
    /// connection and stream send windows. Zero for unknown streams.
    pub fn local_flow_control_window(&self, stream_id: StreamId) -> usize {
        match self.streams.get(&stream_id) {
            Some(stream) if stream.can_send() => self
                .send_window
                .available()
                .min(stream.send_window().available()),
            _ => 0,
        }
    }

    /// The peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn max_outbound_frame_size(&self) -> usize {
        self.encoder.max_frame_size() as usize
    }

    fn check_can_send(&self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Open | ConnectionState::Closing => Ok(()),
            ConnectionState::Closed => Err(ConnectionError::Closed),
            ConnectionState::Idle | ConnectionState::AwaitingPreface => {
                Err(protocol("connection not established"))
            }
        }
    }

    fn is_local(&self, stream_id: StreamId) -> bool {
        match self.role {
            Role::Client => stream_id.is_client_initiated(),
            Role::Server => !stream_id.is_client_initiated(),
        }
    }

    fn count_streams(&self, local: bool) -> usize {
        self.streams
            .keys()
            .filter(|id| self.is_local(**id) == local)
            .count()
    }

    /// Receive window for new streams. Until our SETTINGS are acknowledged
    /// the peer may still be using the protocol default.
    fn recv_initial_window(&self) -> u32 {
        let initial = self.local_settings.initial_window_size;
        if self.local_settings_acked {
            initial
        } else {
            initial.max(DEFAULT_INITIAL_WINDOW_SIZE)
        }
    }

    fn open_local_stream(&mut self, stream_id: StreamId) -> Result<(), ConnectionError> {
        if self.role == Role::Server || !stream_id.is_client_initiated() {
            // no server push
            return Err(ConnectionError::StreamClosed(stream_id));
        }
        if stream_id.value() < self.next_stream_id {
            return Err(ConnectionError::StreamClosed(stream_id));
        }
        if self.state == ConnectionState::Closing {
            return Err(ConnectionError::Refused("connection is closing"));
        }
        if self.count_streams(true) >= self.remote_settings.max_concurrent_streams as usize {
            return Err(ConnectionError::Refused("peer's concurrent stream limit reached"));
        }

        self.next_stream_id = stream_id.value() + 2;
        let stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size,
            self.recv_initial_window(),
        );
        self.streams.insert(stream_id, stream);
        Ok(())
    }

    fn local_end_stream(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_end_stream();
            if stream.is_closed() {
                self.streams.remove(&stream_id);
            }
        }
    }

    fn remote_end_stream(&mut self, stream_id: StreamId, events: &mut Vec<Event>) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.recv_end_stream();
            if stream.is_closed() {
                self.streams.remove(&stream_id);
            }
            events.push(Event::StreamEnded { stream_id });
        }
    }

    fn queue_rst(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.encoder.encode_rst_stream(
            &RstStreamFrame {
                stream_id,
                error_code,
            },
            &mut self.write_buf,
        );
    }

    fn fail(&mut self, err: &ConnectionError) {
        debug!(error = %err, "connection error");
        self.encoder.encode_goaway(
            &GoAwayFrame {
                last_stream_id: self.highest_remote_stream_id,
                error_code: err.error_code(),
                debug_data: Bytes::from(err.to_string()),
            },
            &mut self.write_buf,
        );
        self.state = ConnectionState::Closed;
        self.read_buf.clear();
        self.continuation = None;
    }

    fn process(&mut self, events: &mut Vec<Event>) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::AwaitingPreface {
            let n = self.read_buf.len().min(CONNECTION_PREFACE.len());
            if self.read_buf[..n] != CONNECTION_PREFACE[..n] {
                return Err(protocol("invalid connection preface"));
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(());
            }
            self.read_buf.advance(CONNECTION_PREFACE.len());
            self.state = ConnectionState::Open;
        }

        while let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
            self.handle_frame(frame, events)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<(), ConnectionError> {
        trace!(stream_id = %frame.stream_id(), "received frame");

        if let Some(pending) = &self.continuation {
            match &frame {
                Frame::Continuation(f) if f.stream_id == pending.stream_id => {}
                _ => return Err(protocol("expected CONTINUATION")),
            }
        }
        if !self.remote_settings_received
            && !matches!(frame, Frame::Settings(SettingsFrame { ack: false, .. }))
        {
            return Err(protocol("first frame from peer must be SETTINGS"));
        }

        match frame {
            Frame::Data(f) => self.handle_data(f, events),
            Frame::Headers(f) => self.handle_headers(f, events),
            Frame::Continuation(f) => self.handle_continuation(f, events),
            Frame::RstStream(f) => {
                self.handle_rst_stream(f, events);
                Ok(())
            }
            Frame::Settings(f) => self.handle_settings(f, events),
            Frame::Ping(f) => {
                self.handle_ping(f, events);
                Ok(())
            }
            Frame::GoAway(f) => {
                self.handle_goaway(f, events);
                Ok(())
            }
            Frame::WindowUpdate(f) => self.handle_window_update(f, events),
            Frame::PushPromise(_) => Err(protocol("PUSH_PROMISE received with push disabled")),
            Frame::Priority(_) | Frame::Unknown { .. } => Ok(()),
        }
    }

    fn handle_data(&mut self, frame: DataFrame, events: &mut Vec<Event>) -> Result<(), ConnectionError> {
        let stream_id = frame.stream_id;

        if !self.recv_window.consume(frame.flow_len) {
            return Err(ConnectionError::FlowControl(
                "connection receive window exceeded".to_string(),
            ));
        }
        if let Some(increment) = self.recv_window.take_update() {
            self.encoder.encode_window_update(
                &WindowUpdateFrame {
                    stream_id: StreamId::CONNECTION,
                    increment,
                },
                &mut self.write_buf,
            );
        }

        let Some(stream) = self.streams.get_mut(&stream_id).filter(|s| s.can_recv()) else {
            trace!(%stream_id, "DATA on closed stream");
            self.queue_rst(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };

        let fits = if self.auto_release {
            stream.recv_window_mut().consume(frame.flow_len)
        } else {
            stream.recv_window_mut().consume_held(frame.flow_len)
        };
        if !fits {
            self.streams.remove(&stream_id);
            self.queue_rst(stream_id, ErrorCode::FlowControlError);
            events.push(Event::StreamReset {
                stream_id,
                error_code: ErrorCode::FlowControlError,
            });
            return Ok(());
        }
        let update = if frame.end_stream {
            None
        } else {
            stream.recv_window_mut().take_update()
        };

        events.push(Event::DataReceived {
            stream_id,
            data: frame.data,
            flow_len: frame.flow_len,
        });
        if let Some(increment) = update {
            self.encoder.encode_window_update(
                &WindowUpdateFrame {
                    stream_id,
                    increment,
                },
                &mut self.write_buf,
            );
        }
        if frame.end_stream {
            self.remote_end_stream(stream_id, events);
        }
        Ok(())
    }

    fn handle_headers(
        &mut self,
        frame: HeadersFrame,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        if frame.end_headers {
            return self.finish_headers(frame.stream_id, frame.end_stream, &frame.header_block, events);
        }
        self.continuation = Some(PendingHeaders {
            stream_id: frame.stream_id,
            end_stream: frame.end_stream,
            block: BytesMut::from(&frame.header_block[..]),
        });
        Ok(())
    }

    fn handle_continuation(
        &mut self,
        frame: ContinuationFrame,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        let Some(mut pending) = self.continuation.take() else {
            return Err(protocol("CONTINUATION without HEADERS"));
        };
        pending.block.extend_from_slice(&frame.header_block);
        if pending.block.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(protocol("header block too large"));
        }
        if !frame.end_headers {
            self.continuation = Some(pending);
            return Ok(());
        }
        self.finish_headers(pending.stream_id, pending.end_stream, &pending.block, events)
    }

    fn finish_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        block: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        // every block goes through the decoder to keep HPACK state in sync
        let headers = self.hpack_decoder.decode(block)?;
        match self.role {
            Role::Server => self.server_headers(stream_id, headers, end_stream, events),
            Role::Client => self.client_headers(stream_id, headers, end_stream, events),
        }
    }

    fn server_headers(
        &mut self,
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if !stream.can_recv() {
                self.queue_rst(stream_id, ErrorCode::StreamClosed);
                return Ok(());
            }
            if !end_stream {
                return Err(protocol("trailers without END_STREAM"));
            }
            stream.mark_headers_received();
            events.push(Event::TrailersReceived { stream_id, headers });
            self.remote_end_stream(stream_id, events);
            return Ok(());
        }

        if !stream_id.is_client_initiated() {
            return Err(protocol("client opened an even-numbered stream"));
        }
        if stream_id <= self.highest_remote_stream_id {
            self.queue_rst(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        }
        self.highest_remote_stream_id = stream_id;

        if self.count_streams(false) >= self.local_settings.max_concurrent_streams as usize {
            debug!(%stream_id, "refusing stream over the concurrency limit");
            self.queue_rst(stream_id, ErrorCode::RefusedStream);
            return Ok(());
        }

        let mut stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size,
            self.recv_initial_window(),
        );
        stream.open();
        stream.mark_headers_received();
        self.streams.insert(stream_id, stream);

        events.push(Event::RequestReceived {
            stream_id,
            headers,
            end_stream,
        });
        if end_stream {
            self.remote_end_stream(stream_id, events);
        }
        Ok(())
    }

    fn client_headers(
        &mut self,
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        let Some(stream) = self.streams.get_mut(&stream_id).filter(|s| s.can_recv()) else {
            if !stream_id.is_client_initiated() || stream_id.value() >= self.next_stream_id {
                return Err(protocol("HEADERS on a stream the client never opened"));
            }
            // a stream we reset or finished
            self.queue_rst(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };

        if stream.mark_headers_received() {
            events.push(Event::ResponseReceived {
                stream_id,
                headers,
                end_stream,
            });
        } else {
            if !end_stream {
                return Err(protocol("trailers without END_STREAM"));
            }
            events.push(Event::TrailersReceived { stream_id, headers });
        }
        if end_stream {
            self.remote_end_stream(stream_id, events);
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, frame: RstStreamFrame, events: &mut Vec<Event>) {
        if self.streams.remove(&frame.stream_id).is_some() {
            debug!(stream_id = %frame.stream_id, error_code = %frame.error_code, "stream reset by peer");
            events.push(Event::StreamReset {
                stream_id: frame.stream_id,
                error_code: frame.error_code,
            });
        }
    }

    fn handle_settings(
        &mut self,
        frame: SettingsFrame,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        if frame.ack {
            self.local_settings_acked = true;
            events.push(Event::SettingsAcknowledged);
            return Ok(());
        }

        let mut changed = Vec::new();
        for setting in frame.settings {
            if !self.remote_settings.apply(setting) {
                continue;
            }
            match setting.id {
                SettingId::InitialWindowSize => {
                    for stream in self.streams.values_mut() {
                        stream
                            .send_window_mut()
                            .set_initial_window(setting.value)
                            .map_err(|_| {
                                ConnectionError::FlowControl(
                                    "initial window change overflows a stream window".to_string(),
                                )
                            })?;
                    }
                }
                SettingId::MaxFrameSize => self.encoder.set_max_frame_size(setting.value),
                _ => {}
            }
            changed.push(setting);
        }

        if !self.remote_settings_received {
            self.remote_settings_received = true;
            debug!(role = ?self.role, settings = ?self.remote_settings, "received peer settings");
        }
        self.encoder.encode_settings(
            &SettingsFrame {
                ack: true,
                ..Default::default()
            },
            &mut self.write_buf,
        );
        events.push(Event::RemoteSettingsChanged { changed });
        Ok(())
    }

    fn handle_ping(&mut self, frame: PingFrame, events: &mut Vec<Event>) {
        if frame.ack {
            events.push(Event::PingAcknowledged { data: frame.data });
            return;
        }
        self.encoder.encode_ping(
            &PingFrame {
                ack: true,
                data: frame.data,
            },
            &mut self.write_buf,
        );
    }

    fn handle_goaway(&mut self, frame: GoAwayFrame, events: &mut Vec<Event>) {
        debug!(
            last_stream_id = %frame.last_stream_id,
            error_code = %frame.error_code,
            "received GOAWAY"
        );
        self.state = ConnectionState::Closing;
        self.goaway_received = Some(frame.last_stream_id);

        // the peer will never process our streams above last_stream_id
        let last = frame.last_stream_id;
        let role = self.role;
        self.streams.retain(|id, _| {
            let local = match role {
                Role::Client => id.is_client_initiated(),
                Role::Server => !id.is_client_initiated(),
            };
            !local || *id <= last
        });

        events.push(Event::ConnectionTerminated {
            error_code: frame.error_code,
            last_stream_id: frame.last_stream_id,
            debug_data: frame.debug_data,
        });
    }

    fn handle_window_update(
        &mut self,
        frame: WindowUpdateFrame,
        events: &mut Vec<Event>,
    ) -> Result<(), ConnectionError> {
        let stream_id = frame.stream_id;
        if stream_id.is_connection_level() {
            self.send_window.increase(frame.increment).map_err(|_| {
                ConnectionError::FlowControl("connection send window overflow".to_string())
            })?;
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.send_window_mut().increase(frame.increment).is_err() {
                self.streams.remove(&stream_id);
                self.queue_rst(stream_id, ErrorCode::FlowControlError);
                events.push(Event::StreamReset {
                    stream_id,
                    error_code: ErrorCode::FlowControlError,
                });
                return Ok(());
            }
        } else {
            return Ok(());
        }

        events.push(Event::WindowUpdated {
            stream_id,
            increment: frame.increment,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("streams", &self.streams.len())
            .field("next_stream_id", &self.next_stream_id)
            .finish()
    }
}
