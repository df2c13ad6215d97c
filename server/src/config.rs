//! Example server configuration.
//!
//! A TOML file with the listen address, logging, and the `grpc` server and
//! channel settings. Every section is optional.

use grpc::{ChannelConfig, Compression, Http2Config, ServerConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Printed by `--print-config`. Parses to `Config::default()`.
pub const DEFAULT_CONFIG: &str = r#"# Example gRPC server configuration

[listen]
address = "127.0.0.1:50051"

[logging]
# Filter directive; RUST_LOG overrides it
level = "info"
# "pretty", "compact", or "json"
format = "pretty"
timestamps = true
target = false
thread_names = true

[server]
# Socket read timeout and accept poll interval
poll_interval_ms = 5
# Largest request message accepted, in bytes
max_message_size = 4194304
# Response compression for uncompressed requests: "identity", "gzip", "deflate"
default_compression = "identity"
# Hold response headers until the first message is ready
defer_response_headers = true

[server.http2]
initial_window_size = 1048576
max_frame_size = 16384
max_concurrent_streams = 100

[channel]
poll_interval_ms = 5
max_message_size = 4194304
default_compression = "identity"
# user_agent = "grpc-rust/0.1.0"
# authority = "example.local"

[channel.http2]
initial_window_size = 1048576
max_frame_size = 16384
max_concurrent_streams = 100
"#;

/// Smallest SETTINGS_MAX_FRAME_SIZE HTTP/2 allows.
pub const MIN_FRAME_SIZE: u32 = 16 * 1024;

/// Largest SETTINGS_MAX_FRAME_SIZE HTTP/2 allows.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024 - 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Settings for accepted connections.
    #[serde(default)]
    pub server: ServerConfig,

    /// Settings for `example-client` connections.
    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "grpc=debug,info". `RUST_LOG`
    /// overrides it when set.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    #[serde(default)]
    pub target: bool,

    #[serde(default = "default_true")]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
            thread_names: true,
        }
    }
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50051))
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http2("server.http2", &self.server.http2)?;
        validate_http2("channel.http2", &self.channel.http2)?;

        if self.server.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.poll_interval_ms must be non-zero".into(),
            ));
        }
        if self.channel.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "channel.poll_interval_ms must be non-zero".into(),
            ));
        }

        for (field, name) in [
            ("server.default_compression", &self.server.default_compression),
            ("channel.default_compression", &self.channel.default_compression),
        ] {
            if Compression::from_name(name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{}: unknown compression {:?} (expected identity, gzip, or deflate)",
                    field, name
                )));
            }
        }

        if self.server.max_message_size == 0 || self.channel.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

fn validate_http2(section: &str, http2: &Http2Config) -> Result<(), ConfigError> {
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&http2.max_frame_size) {
        return Err(ConfigError::Invalid(format!(
            "{}.max_frame_size ({}) must be between {} and {}",
            section, http2.max_frame_size, MIN_FRAME_SIZE, MAX_FRAME_SIZE
        )));
    }
    if http2.initial_window_size > i32::MAX as u32 {
        return Err(ConfigError::Invalid(format!(
            "{}.initial_window_size ({}) exceeds {}",
            section,
            http2.initial_window_size,
            i32::MAX
        )));
    }
    Ok(())
}
