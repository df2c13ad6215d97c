//! HTTP/2 frame decoding.

use bytes::{Buf, Bytes, BytesMut};

use super::error::{ErrorCode, FrameError};
use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MAX_WINDOW_SIZE, flags};

/// Parses HTTP/2 frames out of a byte buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest payload we accept; this is the SETTINGS_MAX_FRAME_SIZE we advertised.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
    /// removed from the buffer only when a whole frame is available.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader {
            length: u32::from_be_bytes([0, buf[0], buf[1], buf[2]]),
            frame_type: buf[3],
            flags: buf[4],
            stream_id: StreamId::new(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]])),
        };

        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        parse(header, payload).map(Some)
    }
}

fn parse(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    let Some(kind) = FrameType::from_u8(header.frame_type) else {
        return Ok(Frame::Unknown {
            frame_type: header.frame_type,
            stream_id: header.stream_id,
        });
    };

    match kind {
        FrameType::Data
        | FrameType::Headers
        | FrameType::Priority
        | FrameType::RstStream
        | FrameType::PushPromise
        | FrameType::Continuation => require_stream(&header)?,
        FrameType::Settings | FrameType::Ping | FrameType::GoAway => require_connection(&header)?,
        FrameType::WindowUpdate => {}
    }

    match kind {
        FrameType::Data => {
            let flow_len = payload.len() as u32;
            let data = strip_padding(&header, payload)?;
            Ok(Frame::Data(DataFrame {
                stream_id: header.stream_id,
                end_stream: header.has_flag(flags::END_STREAM),
                data,
                flow_len,
            }))
        }
        FrameType::Headers => {
            let mut block = strip_padding(&header, payload)?;
            if header.has_flag(flags::PRIORITY) {
                // exclusive bit, dependency and weight carry nothing we act on
                expect_at_least(&header, &block, 5)?;
                block.advance(5);
            }
            Ok(Frame::Headers(HeadersFrame {
                stream_id: header.stream_id,
                end_stream: header.has_flag(flags::END_STREAM),
                end_headers: header.has_flag(flags::END_HEADERS),
                header_block: block,
            }))
        }
        FrameType::Priority => {
            expect_exact(&header, &payload, 5)?;
            Ok(Frame::Priority(header.stream_id))
        }
        FrameType::RstStream => {
            expect_exact(&header, &payload, 4)?;
            let mut payload = payload;
            Ok(Frame::RstStream(RstStreamFrame {
                stream_id: header.stream_id,
                error_code: ErrorCode::from_u32(payload.get_u32()),
            }))
        }
        FrameType::Settings => parse_settings(&header, payload),
        FrameType::PushPromise => Ok(Frame::PushPromise(header.stream_id)),
        FrameType::Ping => {
            expect_exact(&header, &payload, 8)?;
            let mut data = [0u8; 8];
            data.copy_from_slice(&payload);
            Ok(Frame::Ping(PingFrame {
                ack: header.has_flag(flags::ACK),
                data,
            }))
        }
        FrameType::GoAway => {
            expect_at_least(&header, &payload, 8)?;
            let mut payload = payload;
            let last_stream_id = StreamId::new(payload.get_u32());
            let error_code = ErrorCode::from_u32(payload.get_u32());
            Ok(Frame::GoAway(GoAwayFrame {
                last_stream_id,
                error_code,
                debug_data: payload,
            }))
        }
        FrameType::WindowUpdate => {
            expect_exact(&header, &payload, 4)?;
            let mut payload = payload;
            let increment = payload.get_u32() & MAX_WINDOW_SIZE;
            if increment == 0 {
                return Err(FrameError::ZeroWindowIncrement);
            }
            Ok(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: header.stream_id,
                increment,
            }))
        }
        FrameType::Continuation => Ok(Frame::Continuation(ContinuationFrame {
            stream_id: header.stream_id,
            end_headers: header.has_flag(flags::END_HEADERS),
            header_block: payload,
        })),
    }
}

fn parse_settings(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    let ack = header.has_flag(flags::ACK);
    if (ack && !payload.is_empty()) || !payload.len().is_multiple_of(6) {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = SettingId::from_u16(payload.get_u16());
        let value = payload.get_u32();
        let valid = match id {
            SettingId::EnablePush => value <= 1,
            SettingId::InitialWindowSize => value <= MAX_WINDOW_SIZE,
            SettingId::MaxFrameSize => (DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&value),
            _ => true,
        };
        if !valid {
            return Err(FrameError::InvalidSettingValue {
                id: id.to_u16(),
                value,
            });
        }
        settings.push(Setting { id, value });
    }

    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

fn strip_padding(header: &FrameHeader, mut payload: Bytes) -> Result<Bytes, FrameError> {
    if !header.has_flag(flags::PADDED) {
        return Ok(payload);
    }
    expect_at_least(header, &payload, 1)?;
    let pad_length = payload.get_u8();
    if pad_length as usize > payload.len() {
        return Err(FrameError::InvalidPadding { pad_length });
    }
    payload.truncate(payload.len() - pad_length as usize);
    Ok(payload)
}

fn require_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection_level() {
        return Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameError> {
    if !header.stream_id.is_connection_level() {
        return Err(FrameError::ConnectionLevelOnly {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn expect_exact(header: &FrameHeader, payload: &Bytes, len: usize) -> Result<(), FrameError> {
    if payload.len() != len {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }
    Ok(())
}

fn expect_at_least(header: &FrameHeader, payload: &Bytes, len: usize) -> Result<(), FrameError> {
    if payload.len() < len {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }
    Ok(())
}
