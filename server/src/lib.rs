//! Example gRPC service host.
//!
//! Serves the `Example` service over the `grpc` crate, with TOML
//! configuration, structured logging, and signal-driven graceful shutdown.

pub mod banner;
pub mod config;
pub mod logging;
pub mod service;
pub mod signal;
pub mod stats;

pub use config::{Config, ConfigError};
pub use service::{ExampleClient, ExampleRequest, ExampleResponse, example_service};
