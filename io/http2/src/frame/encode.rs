//! HTTP/2 frame encoding.

use bytes::{BufMut, BytesMut};

use super::types::*;
use super::{FRAME_HEADER_SIZE, flags};

/// Writes HTTP/2 frames into a byte buffer.
///
/// The encoder only produces the frame types an endpoint without server
/// push ever sends.
#[derive(Debug)]
pub struct FrameEncoder {
    max_frame_size: u32,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: super::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest payload the peer accepts (its SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    #[inline]
    fn write_header(
        &self,
        buf: &mut BytesMut,
        length: usize,
        frame_type: FrameType,
        flags: u8,
        stream_id: StreamId,
    ) {
        buf.reserve(FRAME_HEADER_SIZE + length);
        buf.put_uint(length as u64, 3);
        buf.put_u8(frame_type as u8);
        buf.put_u8(flags);
        buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
    }

    /// Encode a DATA frame. The caller keeps `data` within the max frame size.
    pub fn encode_data(&self, stream_id: StreamId, data: &[u8], end_stream: bool, buf: &mut BytesMut) {
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        self.write_header(buf, data.len(), FrameType::Data, frame_flags, stream_id);
        buf.put_slice(data);
    }

    /// Encode a complete header block as one HEADERS frame followed by as
    /// many CONTINUATION frames as the max frame size requires.
    pub fn encode_header_block(
        &self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
        buf: &mut BytesMut,
    ) {
        let max = self.max_frame_size as usize;
        let mut chunks = block.chunks(max).peekable();

        let first = chunks.next().unwrap_or(&[]);
        let mut frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        if chunks.peek().is_none() {
            frame_flags |= flags::END_HEADERS;
        }
        self.write_header(buf, first.len(), FrameType::Headers, frame_flags, stream_id);
        buf.put_slice(first);

        while let Some(chunk) = chunks.next() {
            let frame_flags = if chunks.peek().is_none() {
                flags::END_HEADERS
            } else {
                0
            };
            self.write_header(buf, chunk.len(), FrameType::Continuation, frame_flags, stream_id);
            buf.put_slice(chunk);
        }
    }

    pub fn encode_rst_stream(&self, frame: &RstStreamFrame, buf: &mut BytesMut) {
        self.write_header(buf, 4, FrameType::RstStream, 0, frame.stream_id);
        buf.put_u32(frame.error_code.to_u32());
    }

    pub fn encode_settings(&self, frame: &SettingsFrame, buf: &mut BytesMut) {
        if frame.ack {
            self.write_header(buf, 0, FrameType::Settings, flags::ACK, StreamId::CONNECTION);
            return;
        }
        self.write_header(
            buf,
            frame.settings.len() * 6,
            FrameType::Settings,
            0,
            StreamId::CONNECTION,
        );
        for setting in &frame.settings {
            buf.put_u16(setting.id.to_u16());
            buf.put_u32(setting.value);
        }
    }

    pub fn encode_ping(&self, frame: &PingFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        self.write_header(buf, 8, FrameType::Ping, frame_flags, StreamId::CONNECTION);
        buf.put_slice(&frame.data);
    }

    pub fn encode_goaway(&self, frame: &GoAwayFrame, buf: &mut BytesMut) {
        self.write_header(
            buf,
            8 + frame.debug_data.len(),
            FrameType::GoAway,
            0,
            StreamId::CONNECTION,
        );
        buf.put_u32(frame.last_stream_id.value() & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code.to_u32());
        buf.put_slice(&frame.debug_data);
    }

    pub fn encode_window_update(&self, frame: &WindowUpdateFrame, buf: &mut BytesMut) {
        self.write_header(buf, 4, FrameType::WindowUpdate, 0, frame.stream_id);
        buf.put_u32(frame.increment & 0x7FFF_FFFF);
    }
}
