//! Frame codec.
//!
//! Every frame starts with a 9-byte header: a 24-bit payload length, the
//! frame type, a flags byte, then one reserved bit and a 31-bit stream id.
//! `FrameDecoder` validates headers against the local settings before the
//! payload is parsed; `FrameEncoder` splits header blocks that exceed the
//! peer's frame size into HEADERS plus CONTINUATION.

mod decode;
mod encode;
mod error;
mod types;

pub use decode::FrameDecoder;
pub use encode::FrameEncoder;
pub use error::{ErrorCode, FrameError};
pub use types::*;

/// Largest frame size a peer may advertise (2^24 - 1).
pub const MAX_FRAME_SIZE: u32 = 16_777_215;

/// Frame size every endpoint must accept (16 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Connection preface sent by clients.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Initial flow-control window for connections and streams.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Largest legal flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// HPACK dynamic table size assumed until SETTINGS say otherwise.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// Concurrent stream limit we advertise by default.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
