//! Controller application configuration.
//!
//! Loaded from a single TOML file through `ConfigLoader`; every table is
//! optional and falls back to its defaults. Command-line flags in
//! [`ProcessOverrides`] are applied on top before bootstrap.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "pendulum_controller"
//!
//! [process]
//! configure_child_threads = false
//! scheduling_priority = 80
//! lock_memory = true
//! auto_start = true
//!
//! [executor]
//! queue_size = 256
//! variant = "static"
//! backpressure = "block"
//! block_timeout_ms = 10
//! ```

use std::time::Duration;

use pendulum_common::config::{ConfigError, SharedConfig, Validate};
use pendulum_common::process::{CpuAffinity, ProcessRealTimeConfig};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerSettings;
use crate::executor::{BackpressurePolicy, ExecutorConfig, ExecutorVariant, QueueSize};

/// Backpressure as written in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureKind {
    #[default]
    Reject,
    Block,
}

/// `[executor]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// One of 16, 64, 256, 1024, 4096.
    #[serde(default)]
    pub queue_size: QueueSize,

    #[serde(default)]
    pub variant: ExecutorVariant,

    #[serde(default)]
    pub backpressure: BackpressureKind,

    /// Producer wait limit for `block`; unset waits indefinitely.
    #[serde(default)]
    pub block_timeout_ms: Option<u64>,
}

impl ExecutorSettings {
    pub fn policy(&self) -> BackpressurePolicy {
        match self.backpressure {
            BackpressureKind::Reject => BackpressurePolicy::Reject,
            BackpressureKind::Block => BackpressurePolicy::Block {
                timeout: self.block_timeout_ms.map(Duration::from_millis),
            },
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            capacity: self.queue_size.capacity(),
            variant: self.variant,
            backpressure: self.policy(),
        }
    }
}

impl Validate for ExecutorSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_timeout_ms.is_some() && self.backpressure != BackpressureKind::Block {
            return Err(ConfigError::ValidationError(
                "executor.block_timeout_ms requires backpressure = \"block\"".into(),
            ));
        }
        Ok(())
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerAppConfig {
    #[serde(default)]
    pub shared: SharedConfig,

    #[serde(default)]
    pub process: ProcessRealTimeConfig,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub controller: ControllerSettings,
}

impl Validate for ControllerAppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.process.validate()?;
        self.executor.validate()?;
        self.controller.validate()
    }
}

/// Command-line overrides of the `[process]` table.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ProcessOverrides {
    /// SCHED_FIFO priority (1-99, 0 leaves the policy untouched).
    #[arg(long, value_name = "PRIO")]
    pub priority: Option<i32>,

    /// Comma-separated CPU list to pin the process to.
    #[arg(long, value_name = "CPUS", value_delimiter = ',')]
    pub cpu_affinity: Option<Vec<usize>>,

    /// Lock current and future memory pages.
    #[arg(long)]
    pub lock_memory: bool,

    /// Heap to prefault after locking memory [MiB].
    #[arg(long, value_name = "MB")]
    pub lock_memory_size_mb: Option<u32>,

    /// Apply RT settings before spawning component threads.
    #[arg(long)]
    pub configure_child_threads: bool,

    /// Activate the controller before entering the dispatch loop.
    #[arg(long)]
    pub auto_start: bool,
}

impl ProcessOverrides {
    /// Apply the overrides and re-validate.
    pub fn apply(&self, process: &mut ProcessRealTimeConfig) -> Result<(), ConfigError> {
        if let Some(priority) = self.priority {
            process.scheduling_priority = priority;
        }
        if let Some(cpus) = &self.cpu_affinity {
            let set = CpuAffinity::new(cpus.iter().copied())
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            process.cpu_affinity = Some(set);
        }
        if let Some(mb) = self.lock_memory_size_mb {
            process.lock_memory_size_mb = mb;
        }
        process.lock_memory |= self.lock_memory;
        process.configure_child_threads |= self.configure_child_threads;
        process.auto_start |= self.auto_start;
        process.validate()
    }
}
