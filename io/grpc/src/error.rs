//! Error type for local failures.
//!
//! [`Status`] is what an RPC reports to its caller; [`Error`] is what goes
//! wrong inside this crate. Every error converts into the status that the
//! affected call ends with.

use crate::status::{Code, Status};
use http2::ConnectionError;
use std::io;

/// Errors raised by streams, channels and servers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream was already closed for writing.
    #[error("stream is closed")]
    StreamClosed,

    /// The peer violated the gRPC framing or header rules.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No mutually supported compression algorithm.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A message exceeded the configured limit.
    #[error("message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// The HTTP/2 engine failed.
    #[error("http2: {0}")]
    Http2(#[from] ConnectionError),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// The connection went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// An RPC completed with a non-OK status.
    #[error("{0}")]
    Status(#[from] Status),
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        let code = match &error {
            Error::Status(status) => return status.clone(),
            Error::StreamClosed => Code::Cancelled,
            Error::Protocol(_) => Code::Internal,
            Error::UnsupportedEncoding(_) => Code::Unimplemented,
            Error::MessageTooLarge { .. } => Code::ResourceExhausted,
            Error::Http2(ConnectionError::Refused(_) | ConnectionError::Closed) => {
                Code::Unavailable
            }
            Error::Http2(_) => Code::Internal,
            Error::Io(_) | Error::ConnectionClosed => Code::Unavailable,
        };
        Status::new(code, error.to_string())
    }
}
