//! Inverted-pendulum controller component.
//!
//! - [`law`]: linear state-feedback law.
//! - [`node`]: lifecycle node wrapping the law, driven by the executor.
//! - [`telemetry`]: background thread reporting update-loop latency.

pub mod law;
pub mod node;
pub mod telemetry;

pub use law::PendulumController;
pub use node::{CommandPublisher, PendulumControllerNode};
pub use telemetry::TelemetryReporter;

use std::path::PathBuf;
use std::time::Duration;

use pendulum_common::config::{ConfigError, Validate};
use pendulum_common::consts::{
    DEFAULT_DEADLINE_US, DEFAULT_TELEMETRY_INTERVAL_MS, DEFAULT_UPDATE_PERIOD_US,
};
use serde::{Deserialize, Serialize};

/// LQR gains for the default cart/pole model.
pub const DEFAULT_FEEDBACK_MATRIX: [f64; 4] = [-10.0, -51.5393, 356.8637, 154.4060];

/// `[controller]` table.
///
/// # TOML Example
///
/// ```toml
/// [controller]
/// feedback_matrix = [-10.0, -51.5393, 356.8637, 154.4060]
/// update_period_us = 1000
/// deadline_us = 2000
/// telemetry_interval_ms = 1000
/// latency_report = "/var/log/pendulum/latency.csv"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSettings {
    #[serde(default = "default_feedback_matrix")]
    pub feedback_matrix: [f64; 4],

    /// Update timer period [µs].
    #[serde(default = "default_update_period_us")]
    pub update_period_us: u64,

    /// Wake-up latency beyond which an update counts as a missed deadline
    /// [µs]; 0 disables deadline accounting.
    #[serde(default = "default_deadline_us")]
    pub deadline_us: u64,

    /// Telemetry report interval [ms]; 0 disables the reporter thread.
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,

    /// Latency statistics CSV written at shutdown.
    #[serde(default)]
    pub latency_report: Option<PathBuf>,
}

fn default_feedback_matrix() -> [f64; 4] {
    DEFAULT_FEEDBACK_MATRIX
}

fn default_update_period_us() -> u64 {
    DEFAULT_UPDATE_PERIOD_US
}

fn default_deadline_us() -> u64 {
    DEFAULT_DEADLINE_US
}

fn default_telemetry_interval_ms() -> u64 {
    DEFAULT_TELEMETRY_INTERVAL_MS
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            feedback_matrix: DEFAULT_FEEDBACK_MATRIX,
            update_period_us: DEFAULT_UPDATE_PERIOD_US,
            deadline_us: DEFAULT_DEADLINE_US,
            telemetry_interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
            latency_report: None,
        }
    }
}

impl ControllerSettings {
    #[inline]
    pub fn update_period(&self) -> Duration {
        Duration::from_micros(self.update_period_us)
    }

    #[inline]
    pub fn telemetry_interval(&self) -> Option<Duration> {
        (self.telemetry_interval_ms > 0).then(|| Duration::from_millis(self.telemetry_interval_ms))
    }
}

impl Validate for ControllerSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.update_period_us == 0 {
            return Err(ConfigError::ValidationError(
                "controller.update_period_us must be > 0".into(),
            ));
        }
        if let Some(k) = self.feedback_matrix.iter().find(|k| !k.is_finite()) {
            return Err(ConfigError::ValidationError(format!(
                "controller.feedback_matrix contains non-finite gain {k}"
            )));
        }
        Ok(())
    }
}
