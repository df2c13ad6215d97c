//! HTTP/2 stream state tracking.

use super::flow_control::FlowControl;
pub use crate::frame::StreamId;

/// Stream state (RFC 9113 Section 5.1), without the push states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// We sent END_STREAM.
    HalfClosedLocal,
    /// Peer sent END_STREAM.
    HalfClosedRemote,
    Closed,
}

/// Per-stream state held by a connection.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: StreamState,
    send_window: FlowControl,
    recv_window: FlowControl,
    /// Whether the peer's first header block has arrived. A second block is
    /// trailers.
    headers_received: bool,
}

impl Stream {
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: FlowControl::new(send_window),
            recv_window: FlowControl::new(recv_window),
            headers_received: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn can_send(&self) -> bool {
        matches!(
            self.state,
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedRemote
        )
    }

    pub fn can_recv(&self) -> bool {
        matches!(
            self.state,
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedLocal
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Idle becomes Open on the first HEADERS in either direction.
    pub fn open(&mut self) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Open;
        }
    }

    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Record a received header block; returns true if it is the first one.
    pub fn mark_headers_received(&mut self) -> bool {
        !std::mem::replace(&mut self.headers_received, true)
    }

    pub fn send_window(&self) -> &FlowControl {
        &self.send_window
    }

    pub fn send_window_mut(&mut self) -> &mut FlowControl {
        &mut self.send_window
    }

    pub fn recv_window_mut(&mut self) -> &mut FlowControl {
        &mut self.recv_window
    }
}
