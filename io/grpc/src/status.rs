//! gRPC status codes.

use crate::metadata::Metadata;
use bytes::Bytes;
use http2::ErrorCode;
use std::fmt;

/// gRPC status codes (different from HTTP status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Invalid argument was provided.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// Resource has been exhausted.
    ResourceExhausted = 8,
    /// Operation was rejected because the system is not in a state required for execution.
    FailedPrecondition = 9,
    /// Operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// Request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Create a Code from its numeric value. Out-of-range values are Unknown.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }

    /// Status for an HTTP response that did not carry `grpc-status`.
    ///
    /// Follows the gRPC HTTP-to-status mapping.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502..=504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of an RPC: a code, a message, and optional binary details.
///
/// On the wire this travels as the `grpc-status`, `grpc-message` and
/// `grpc-status-details-bin` trailers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
    details: Option<Bytes>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: String::new(),
            details: None,
        }
    }

    /// Attach an opaque details blob (usually a serialized `google.rpc.Status`).
    pub fn with_details(mut self, details: impl Into<Bytes>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    /// The status message; empty if none was given.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Bytes> {
        self.details.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// Status for a stream the peer reset with `code`.
    pub fn from_reset(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Cancel => Status::cancelled("stream cancelled by peer"),
            ErrorCode::RefusedStream => Status::unavailable("stream refused by peer"),
            other => Status::internal(format!("stream reset by peer: {}", other)),
        }
    }

    /// Write this status into `trailers`, replacing any earlier status.
    pub fn write_trailers(&self, trailers: &mut Metadata) {
        trailers.set("grpc-status", self.code.as_u32().to_string());
        if self.message.is_empty() {
            trailers.remove("grpc-message");
        } else {
            trailers.set("grpc-message", percent_encode(&self.message));
        }
        match &self.details {
            Some(details) => trailers.set("grpc-status-details-bin", details.clone()),
            None => {
                trailers.remove("grpc-status-details-bin");
            }
        }
    }

    /// Read a status out of received trailers.
    ///
    /// Returns `None` if `grpc-status` is missing. An unparseable code reads
    /// as UNKNOWN.
    pub fn from_trailers(trailers: &Metadata) -> Option<Status> {
        let raw = trailers.get("grpc-status")?;
        let code = raw
            .trim()
            .parse::<u32>()
            .map(Code::from_u32)
            .unwrap_or(Code::Unknown);
        let message = trailers
            .get("grpc-message")
            .map(|m| percent_decode(&m))
            .unwrap_or_default();
        Some(Status {
            code,
            message,
            details: trailers.get_bin("grpc-status-details-bin"),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Percent-encode a `grpc-message` value.
///
/// Bytes outside printable ASCII, and `%` itself, become `%XX`.
pub fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &b in message.as_bytes() {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Decode a percent-encoded `grpc-message`. Malformed escapes are kept as-is.
pub fn percent_decode(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for i in 0..=16 {
            let code = Code::from_u32(i);
            assert_eq!(code.as_u32(), i);
        }
    }

    #[test]
    fn test_code_from_u32_unknown() {
        assert_eq!(Code::from_u32(17), Code::Unknown);
        assert_eq!(Code::from_u32(u32::MAX), Code::Unknown);
    }

    #[test]
    fn test_code_display() {
        assert_eq!(format!("{}", Code::Ok), "OK");
        assert_eq!(format!("{}", Code::DeadlineExceeded), "DEADLINE_EXCEEDED");
        assert_eq!(format!("{}", Code::Unimplemented), "UNIMPLEMENTED");
    }

    #[test]
    fn test_code_from_http_status() {
        assert_eq!(Code::from_http_status(404), Code::Unimplemented);
        assert_eq!(Code::from_http_status(503), Code::Unavailable);
        assert_eq!(Code::from_http_status(418), Code::Unknown);
    }

    #[test]
    fn test_status_ok() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert_eq!(status.message(), "");
        assert!(status.details().is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::from_code(Code::Ok)), "OK");
        assert_eq!(
            format!("{}", Status::not_found("entity not found")),
            "NOT_FOUND: entity not found"
        );
    }

    #[test]
    fn test_status_from_reset() {
        assert_eq!(Status::from_reset(ErrorCode::Cancel).code(), Code::Cancelled);
        assert_eq!(
            Status::from_reset(ErrorCode::RefusedStream).code(),
            Code::Unavailable
        );
        assert_eq!(
            Status::from_reset(ErrorCode::ProtocolError).code(),
            Code::Internal
        );
    }

    #[test]
    fn test_percent_encoding() {
        assert_eq!(percent_encode("plain text"), "plain text");
        assert_eq!(percent_encode("50% off"), "50%25 off");
        assert_eq!(percent_encode("line\nbreak"), "line%0Abreak");
        assert_eq!(percent_encode("café"), "caf%C3%A9");

        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("50%25 off"), "50% off");
        // malformed escapes pass through
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_trailers_round_trip() {
        let status = Status::new(Code::InvalidArgument, "bad\tinput: 100%")
            .with_details(Bytes::from_static(b"\x00\x01\xff"));
        let mut trailers = Metadata::new();
        status.write_trailers(&mut trailers);

        assert_eq!(trailers.get("grpc-status").as_deref(), Some("3"));
        assert_eq!(
            trailers.get("grpc-message").as_deref(),
            Some("bad%09input: 100%25")
        );
        assert_eq!(Status::from_trailers(&trailers), Some(status));
    }

    #[test]
    fn test_write_trailers_replaces_previous() {
        let mut trailers = Metadata::new();
        Status::internal("first").write_trailers(&mut trailers);
        Status::ok().write_trailers(&mut trailers);

        assert_eq!(trailers.get("grpc-status").as_deref(), Some("0"));
        assert!(trailers.get("grpc-message").is_none());
    }

    #[test]
    fn test_from_trailers() {
        assert_eq!(Status::from_trailers(&Metadata::new()), None);

        let mut trailers = Metadata::new();
        trailers.set("grpc-status", "garbage");
        assert_eq!(
            Status::from_trailers(&trailers).map(|s| s.code()),
            Some(Code::Unknown)
        );
    }

    #[test]
    fn test_status_is_error() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<Status>();
    }
}
