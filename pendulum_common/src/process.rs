//! Process real-time settings.
//!
//! [`ProcessRealTimeConfig`] is loaded once at startup (TOML `[process]`
//! table, optionally overridden from the command line) and never mutated
//! afterwards. It is read by the RT configurator and by the bootstrap
//! orchestrator, which uses `configure_child_threads` to decide whether the
//! scheduling attributes are applied before or after the controller
//! component and executor are created.
//!
//! # TOML Example
//!
//! ```toml
//! [process]
//! configure_child_threads = false
//! scheduling_priority = 80
//! lock_memory = true
//! lock_memory_size_mb = 100
//! cpu_affinity = [2, 3]
//! auto_start = true
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::consts::{MAX_AFFINITY_CPUS, RT_PRIORITY_MAX, RT_PRIORITY_MIN};

/// Error building a [`CpuAffinity`] set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    /// More distinct CPUs than the mask can hold.
    #[error("affinity mask holds at most {max} CPUs, got {count}")]
    TooManyCpus { count: usize, max: usize },
}

/// Set of CPU indices the process is pinned to.
///
/// Stored sorted and de-duplicated in a fixed-capacity buffer. An empty set
/// is representable on purpose: the RT configurator rejects it with
/// `InvalidAffinity` rather than silently ignoring it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct CpuAffinity {
    cpus: heapless::Vec<usize, MAX_AFFINITY_CPUS>,
}

impl CpuAffinity {
    /// Build a set from arbitrary CPU indices (duplicates are collapsed).
    pub fn new<I: IntoIterator<Item = usize>>(cpus: I) -> Result<Self, AffinityError> {
        let mut all: Vec<usize> = cpus.into_iter().collect();
        all.sort_unstable();
        all.dedup();

        let mut set = heapless::Vec::new();
        for cpu in &all {
            set.push(*cpu).map_err(|_| AffinityError::TooManyCpus {
                count: all.len(),
                max: MAX_AFFINITY_CPUS,
            })?;
        }
        Ok(Self { cpus: set })
    }

    /// CPU indices in ascending order.
    #[inline]
    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    #[inline]
    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.binary_search(&cpu).is_ok()
    }

    /// Highest CPU index in the set.
    #[inline]
    pub fn max_cpu(&self) -> Option<usize> {
        self.cpus.last().copied()
    }
}

impl TryFrom<Vec<usize>> for CpuAffinity {
    type Error = AffinityError;

    fn try_from(value: Vec<usize>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CpuAffinity> for Vec<usize> {
    fn from(value: CpuAffinity) -> Self {
        value.cpus.iter().copied().collect()
    }
}

/// Real-time settings of the controller process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessRealTimeConfig {
    /// Apply RT settings before creating the component so that threads it
    /// spawns inherit them.
    #[serde(default)]
    pub configure_child_threads: bool,

    /// SCHED_FIFO priority; 0 leaves the scheduling policy untouched.
    #[serde(default)]
    pub scheduling_priority: i32,

    /// Lock current and future pages with `mlockall`.
    #[serde(default)]
    pub lock_memory: bool,

    /// Heap to prefault after locking memory [MiB]; 0 disables prefaulting.
    #[serde(default)]
    pub lock_memory_size_mb: u32,

    /// CPUs to pin the process to; `None` keeps the inherited mask.
    #[serde(default)]
    pub cpu_affinity: Option<CpuAffinity>,

    /// Drive the component to `Active` before entering the dispatch loop.
    #[serde(default)]
    pub auto_start: bool,
}

impl ProcessRealTimeConfig {
    /// Returns true if any RT attribute is requested.
    ///
    /// When false, RT configuration is disabled entirely and neither the
    /// pre-creation nor the post-creation configuration phase runs.
    pub fn is_realtime_requested(&self) -> bool {
        self.scheduling_priority != 0 || self.lock_memory || self.cpu_affinity.is_some()
    }

    /// Validate static ranges. Host-dependent checks (CPU count, privileges)
    /// are left to the RT configurator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `scheduling_priority` is neither 0 nor within the SCHED_FIFO range
    /// - `lock_memory_size_mb` is set without `lock_memory`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.scheduling_priority;
        if p != 0 && !(RT_PRIORITY_MIN..=RT_PRIORITY_MAX).contains(&p) {
            return Err(ConfigError::ValidationError(format!(
                "scheduling_priority {p} outside {RT_PRIORITY_MIN}..={RT_PRIORITY_MAX} (or 0 to disable)"
            )));
        }
        if self.lock_memory_size_mb > 0 && !self.lock_memory {
            return Err(ConfigError::ValidationError(
                "lock_memory_size_mb requires lock_memory = true".to_string(),
            ));
        }
        Ok(())
    }
}
