//! HTTP/2 error codes and frame errors.

use std::fmt;

/// HTTP/2 error codes (RFC 9113 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            // unknown codes are treated as INTERNAL_ERROR
            _ => ErrorCode::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Frame parsing errors. All of them are connection errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("frame type {frame_type:#04x} requires a non-zero stream id")]
    StreamIdRequired { frame_type: u8 },
    #[error("frame type {frame_type:#04x} is only valid on stream 0")]
    ConnectionLevelOnly { frame_type: u8 },
    #[error("frame type {frame_type:#04x} has invalid payload length {length}")]
    InvalidPayloadLength { frame_type: u8, length: usize },
    #[error("padding length {pad_length} exceeds payload")]
    InvalidPadding { pad_length: u8 },
    #[error("invalid value {value} for setting {id:#06x}")]
    InvalidSettingValue { id: u16, value: u32 },
    #[error("window increment must be non-zero")]
    ZeroWindowIncrement,
}

impl FrameError {
    /// Error code to report in the GOAWAY that closes the connection.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::FrameTooLarge { .. } | FrameError::InvalidPayloadLength { .. } => {
                ErrorCode::FrameSizeError
            }
            // RFC 9113 6.5.2: an oversized initial window is a flow-control error
            FrameError::InvalidSettingValue { id: 0x4, .. } => ErrorCode::FlowControlError,
            _ => ErrorCode::ProtocolError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in 0x0..=0xdu32 {
            assert_eq!(ErrorCode::from_u32(code).to_u32(), code);
        }
    }

    #[test]
    fn test_error_code_unknown_is_internal() {
        assert_eq!(ErrorCode::from_u32(0xff), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::RefusedStream.to_string(), "REFUSED_STREAM");
        assert_eq!(ErrorCode::Http11Required.to_string(), "HTTP_1_1_REQUIRED");
    }

    #[test]
    fn test_frame_error_codes() {
        let err = FrameError::FrameTooLarge { size: 1, max: 0 };
        assert_eq!(err.error_code(), ErrorCode::FrameSizeError);

        let err = FrameError::InvalidSettingValue {
            id: 0x4,
            value: u32::MAX,
        };
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);

        assert_eq!(
            FrameError::ZeroWindowIncrement.error_code(),
            ErrorCode::ProtocolError
        );
    }
}
