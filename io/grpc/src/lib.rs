//! grpc - gRPC over HTTP/2 for thread-based clients and servers.
//!
//! This crate bridges the sans-IO [`http2`] engine to gRPC semantics. It
//! does not use async/await: every connection runs on its own thread, and
//! handlers, request producers, and response consumers run on theirs.
//!
//! # Features
//!
//! - Unary and streaming RPCs in all four cardinalities
//! - Metadata, including binary `-bin` headers
//! - gzip and deflate message compression with negotiation
//! - Deadlines (`grpc-timeout`) enforced on both ends
//! - The canonical gRPC status model, with trailers-only error responses
//!
//! # Architecture
//!
//! gRPC messages are framed as:
//! - 1 byte: compressed flag
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload (protobuf, via `prost`)
//!
//! Each call is a [`ReceiveStream`] / [`SendStream`] pair. The connection
//! thread writes inbound DATA into the receive side and drains the send
//! side into DATA frames as flow control allows; other threads only touch
//! the streams' queues.
//!
//! ```ignore
//! let server = Server::builder(ServerConfig::default())
//!     .add_service(Service::new("helloworld.Greeter").unary_unary(
//!         "SayHello",
//!         |req: HelloRequest, _ctx| Ok(HelloReply { message: req.name }),
//!     ))
//!     .build();
//!
//! let channel = Channel::connect("127.0.0.1:50051", ChannelConfig::default())?;
//! let reply: HelloReply = channel
//!     .unary_unary("/helloworld.Greeter/SayHello", request, CallOptions::new())
//!     .message()?;
//! ```

mod broadcast;
mod buffer;
mod client;
mod codec;
mod compression;
mod connection;
mod deadline;
mod error;
mod frame;
mod metadata;
mod receive;
mod registry;
mod send;
mod server;
mod service;
mod status;

pub mod config;
pub mod metrics;

pub use broadcast::{Subscriber, tee};
pub use buffer::ByteBuffer;
pub use client::{Call, CallOptions, Channel};
pub use codec::EncodeMessage;
pub use compression::{Compression, accept_encoding, select_algorithm};
pub use config::{ChannelConfig, Http2Config, ServerConfig};
pub use error::Error;
pub use frame::{DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE, RawMessage, decode_message, encode_message};
pub use metadata::{Metadata, Timeout};
pub use receive::{ReceiveStream, Streaming};
pub use registry::{Cardinality, MethodDescriptor, MethodRegistry, RegisteredMethod};
pub use send::SendStream;
pub use server::{Server, ServerBuilder, ShutdownHandle};
pub use service::{Service, ServerContext};
pub use status::{Code, Status};
