//! Channel and server configuration.
//!
//! All structs deserialize from TOML with every field optional.

use crate::compression::Compression;
use crate::frame::DEFAULT_MAX_MESSAGE_SIZE;
use http2::ConnectionSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP/2 settings advertised to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Http2Config {
    /// Initial per-stream receive window.
    #[serde(default = "default_initial_window_size")]
    pub initial_window_size: u32,

    /// Largest DATA frame payload we accept (16 KiB to 16 MiB).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,

    /// Concurrent streams we allow the peer to open.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            initial_window_size: default_initial_window_size(),
            max_frame_size: default_max_frame_size(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

impl Http2Config {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new()
            .initial_window_size(self.initial_window_size)
            .max_frame_size(self.max_frame_size)
            .max_concurrent_streams(self.max_concurrent_streams)
    }
}

/// Client channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    #[serde(default)]
    pub http2: Http2Config,

    /// Socket read timeout of the connection loop, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest response message accepted.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Request compression when a call does not choose one.
    #[serde(default = "default_compression")]
    pub default_compression: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `:authority` to send instead of the connected address.
    #[serde(default)]
    pub authority: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            http2: Http2Config::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_message_size: default_max_message_size(),
            default_compression: default_compression(),
            user_agent: default_user_agent(),
            authority: None,
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured default compression; unknown names fall back to identity.
    pub fn compression(&self) -> Compression {
        Compression::from_name(&self.default_compression).unwrap_or_default()
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub http2: Http2Config,

    /// Socket read timeout of each connection loop, and the accept poll
    /// interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest request message accepted.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Response compression when the client's request was not compressed.
    #[serde(default = "default_compression")]
    pub default_compression: String,

    /// Hold response headers back until the first message is ready.
    #[serde(default = "default_defer_response_headers")]
    pub defer_response_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http2: Http2Config::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_message_size: default_max_message_size(),
            default_compression: default_compression(),
            defer_response_headers: default_defer_response_headers(),
        }
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn compression(&self) -> Compression {
        Compression::from_name(&self.default_compression).unwrap_or_default()
    }
}

fn default_initial_window_size() -> u32 {
    1024 * 1024
}

fn default_max_frame_size() -> u32 {
    http2::DEFAULT_MAX_FRAME_SIZE
}

fn default_max_concurrent_streams() -> u32 {
    http2::DEFAULT_MAX_CONCURRENT_STREAMS
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_compression() -> String {
    Compression::Identity.name().to_string()
}

fn default_user_agent() -> String {
    format!("grpc-rust/{}", env!("CARGO_PKG_VERSION"))
}

fn default_defer_response_headers() -> bool {
    true
}
