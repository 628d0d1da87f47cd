//! Bootstrap errors and process exit codes.

use std::any::Any;

use pendulum_common::config::ConfigError;
use thiserror::Error;

use crate::executor::ExecutorError;
use crate::lifecycle::TransitionError;
use crate::logging::LoggingError;
use crate::rt::RtConfigError;

/// Clean shutdown.
pub const EXIT_OK: i32 = 0;

/// Recognized error, logged with its message.
pub const EXIT_RECOGNIZED_FAULT: i32 = 2;

/// Unknown fault (shows as 255 in the shell).
pub const EXIT_UNKNOWN_FAULT: i32 = -1;

/// Fatal error ending the bootstrap.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("real-time setup: {0}")]
    RealTime(#[from] RtConfigError),

    #[error("lifecycle: {0}")]
    Transition(#[from] TransitionError),

    #[error("executor: {0}")]
    Executor(#[from] ExecutorError),

    #[error("component creation: {0}")]
    Component(String),

    #[error("signal handler: {0}")]
    Signal(String),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("unknown fault: {0}")]
    Unknown(String),
}

impl BootstrapError {
    /// Stable mapping to the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unknown(_) => EXIT_UNKNOWN_FAULT,
            _ => EXIT_RECOGNIZED_FAULT,
        }
    }

    /// Wrap a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Unknown(msg)
    }
}
