//! System-wide constants for the pendulum workspace.
//!
//! Single source of truth for numeric limits and default paths.

use static_assertions::const_assert;

/// Default executor queue capacity (outstanding work items).
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Largest queue capacity accepted by the executor factory.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Maximum number of CPUs that can be listed in an affinity mask.
pub const MAX_AFFINITY_CPUS: usize = 64;

/// Lowest SCHED_FIFO priority on Linux.
pub const RT_PRIORITY_MIN: i32 = 1;

/// Highest SCHED_FIFO priority on Linux.
pub const RT_PRIORITY_MAX: i32 = 99;

/// Default controller update period in microseconds (1 kHz).
pub const DEFAULT_UPDATE_PERIOD_US: u64 = 1000;

/// Default controller deadline in microseconds.
pub const DEFAULT_DEADLINE_US: u64 = 2000;

/// Default telemetry report interval in milliseconds.
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 1000;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pendulum/controller.toml";

const_assert!(DEFAULT_QUEUE_CAPACITY > 0);
const_assert!(DEFAULT_QUEUE_CAPACITY <= MAX_QUEUE_CAPACITY);
const_assert!(RT_PRIORITY_MIN < RT_PRIORITY_MAX);
const_assert!(DEFAULT_UPDATE_PERIOD_US < DEFAULT_DEADLINE_US);
