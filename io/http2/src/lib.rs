//! http2 - sans-IO HTTP/2 protocol engine.
//!
//! This crate turns bytes read from a socket into protocol [`Event`]s and
//! turns send calls (`send_headers`, `send_data`, ...) into bytes that the
//! caller writes back to the socket. It owns no socket and spawns no threads.
//!
//! # Features
//!
//! - Frame encoding and decoding
//! - HPACK header compression (via `fluke-hpack`)
//! - Connection and stream state for both client and server roles
//! - Connection- and stream-level flow control with automatic WINDOW_UPDATEs
//! - GOAWAY handling that keeps in-flight streams serviceable
//!
//! # Architecture
//!
//! - `frame`: frame types, encoding, and decoding
//! - `hpack`: header block compression
//! - `connection`: the [`Connection`] state machine and its [`Event`]s

pub mod connection;
pub mod frame;
pub mod hpack;

pub use frame::{
    CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_FRAME_SIZE, ErrorCode, FRAME_HEADER_SIZE, Frame,
    FrameDecoder, FrameEncoder, FrameError, MAX_FRAME_SIZE, MAX_WINDOW_SIZE, Setting, SettingId,
    StreamId,
};

pub use hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};

pub use connection::{
    Connection, ConnectionError, ConnectionSettings, ConnectionState, Event, FlowControl, Role,
    Stream, StreamState,
};
