//! One-time `tracing` subscriber setup.

use pendulum_common::config::LogLevel;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Error)]
#[error("logging already initialized: {0}")]
pub struct LoggingError(String);

fn level_of(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Install the global subscriber.
///
/// `verbose` raises the level to at least DEBUG; `RUST_LOG` directives are
/// honoured on top. A second call returns an error instead of panicking.
pub fn init_logging(level: LogLevel, verbose: bool, json: bool) -> Result<(), LoggingError> {
    let level = match (verbose, level_of(level)) {
        (true, l) if l < Level::DEBUG => Level::DEBUG,
        (_, l) => l,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init()
    };
    result.map_err(|e| LoggingError(e.to_string()))
}
