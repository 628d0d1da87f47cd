//! Prelude module for common re-exports.
//!
//! ```rust
//! use pendulum_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, Validate};
pub use crate::process::{AffinityError, CpuAffinity, ProcessRealTimeConfig};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::lifecycle::{LifecycleState, Transition};

// ─── Messages ───────────────────────────────────────────────────────
pub use crate::data::{JointCommand, JointState, Message, Teleop};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_QUEUE_CAPACITY, DEFAULT_UPDATE_PERIOD_US};
