//! Logging setup for the example binaries.
//!
//! `RUST_LOG`, when set, replaces the configured filter.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the filter for `config`.
///
/// An unparsable level falls back to `info`.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn layer(config: &LoggingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_target(config.target)
        .with_thread_names(config.thread_names);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.with_ansi(true).boxed(),
        (LogFormat::Pretty, false) => base.with_ansi(true).without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
    }
}

/// Install the global subscriber.
///
/// ```ignore
/// server::logging::init(&LoggingConfig::default());
/// tracing::info!("starting");
/// ```
pub fn init(config: &LoggingConfig) {
    let subscriber = tracing_subscriber::registry()
        .with(layer(config))
        .with(filter(config));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("a global subscriber is already installed");
    }
}
