//! Process real-time configuration.
//!
//! Applies, in order:
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` and stack/heap prefaulting.
//! 2. `sched_setaffinity` to the configured CPU set.
//! 3. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! Everything is validated before the first system call, so an invalid
//! request changes nothing. Affinity and scheduling apply to the calling
//! thread; threads spawned afterwards inherit them.
//!
//! Without the `rt` feature the system calls are skipped and only the
//! validation and bookkeeping run (simulation mode).

use bitflags::bitflags;
use pendulum_common::consts::{RT_PRIORITY_MAX, RT_PRIORITY_MIN};
use pendulum_common::process::ProcessRealTimeConfig;
use thiserror::Error;
use tracing::{debug, info};

/// Stack touched after locking memory [bytes].
const PREFAULT_STACK_BYTES: usize = 256 * 1024;

bitflags! {
    /// Attributes the last `configure()` call applied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppliedAttributes: u8 {
        const MEMORY_LOCKED   = 0b0001;
        const HEAP_PREFAULTED = 0b0010;
        const AFFINITY        = 0b0100;
        const PRIORITY        = 0b1000;
    }
}

/// Real-time configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtConfigError {
    /// The OS refused for lack of privileges (EPERM, or ENOMEM from a
    /// memlock limit).
    #[error("{operation}: insufficient privilege ({detail})")]
    InsufficientPrivilege {
        operation: &'static str,
        detail: String,
    },

    /// Empty mask or CPU index not present on this host.
    #[error("invalid CPU affinity: {0}")]
    InvalidAffinity(String),

    #[error("scheduling priority {priority} outside {min}..={max}")]
    InvalidPriority { priority: i32, min: i32, max: i32 },

    /// Any other OS failure.
    #[error("{operation} failed: {detail}")]
    Os {
        operation: &'static str,
        detail: String,
    },
}

/// Applies process-level scheduling attributes.
///
/// The bootstrap orchestrator is generic over this trait so that tests can
/// observe when configuration happens without touching the host.
pub trait SchedulingConfigurator {
    /// Apply `config` to the calling process. Idempotent.
    fn configure(&mut self, config: &ProcessRealTimeConfig) -> Result<(), RtConfigError>;
}

/// Configurator backed by `mlockall`, `sched_setaffinity` and
/// `sched_setscheduler`.
#[derive(Debug, Clone)]
pub struct RealTimeConfigurator {
    host_cpus: usize,
    applied: AppliedAttributes,
}

impl Default for RealTimeConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTimeConfigurator {
    /// Configurator for the current host.
    pub fn new() -> Self {
        Self::with_host_cpus(host_cpu_count())
    }

    /// Configurator validating affinity against `host_cpus` CPUs.
    pub fn with_host_cpus(host_cpus: usize) -> Self {
        Self {
            host_cpus,
            applied: AppliedAttributes::empty(),
        }
    }

    #[inline]
    pub fn host_cpus(&self) -> usize {
        self.host_cpus
    }

    #[inline]
    pub fn applied(&self) -> AppliedAttributes {
        self.applied
    }

    /// Check a configuration against the host without applying it.
    pub fn validate(&self, config: &ProcessRealTimeConfig) -> Result<(), RtConfigError> {
        let priority = config.scheduling_priority;
        if priority != 0 && !(RT_PRIORITY_MIN..=RT_PRIORITY_MAX).contains(&priority) {
            return Err(RtConfigError::InvalidPriority {
                priority,
                min: RT_PRIORITY_MIN,
                max: RT_PRIORITY_MAX,
            });
        }

        if let Some(affinity) = &config.cpu_affinity {
            match affinity.max_cpu() {
                None => return Err(RtConfigError::InvalidAffinity("empty CPU set".into())),
                Some(cpu) if cpu >= self.host_cpus => {
                    return Err(RtConfigError::InvalidAffinity(format!(
                        "CPU {cpu} not present (host has {} CPUs)",
                        self.host_cpus
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl SchedulingConfigurator for RealTimeConfigurator {
    fn configure(&mut self, config: &ProcessRealTimeConfig) -> Result<(), RtConfigError> {
        self.validate(config)?;
        let mut applied = AppliedAttributes::empty();

        if config.lock_memory {
            lock_memory()?;
            prefault_stack();
            applied |= AppliedAttributes::MEMORY_LOCKED;

            if config.lock_memory_size_mb > 0 {
                prefault_heap(config.lock_memory_size_mb as usize * 1024 * 1024);
                applied |= AppliedAttributes::HEAP_PREFAULTED;
            }
        }

        if let Some(affinity) = &config.cpu_affinity {
            set_affinity(affinity.cpus())?;
            applied |= AppliedAttributes::AFFINITY;
        }

        if config.scheduling_priority != 0 {
            set_fifo_priority(config.scheduling_priority)?;
            applied |= AppliedAttributes::PRIORITY;
        }

        self.applied = applied;
        info!(
            ?applied,
            priority = config.scheduling_priority,
            simulated = cfg!(not(feature = "rt")),
            "real-time attributes configured"
        );
        Ok(())
    }
}

// ─── System Calls ───────────────────────────────────────────────────

fn host_cpu_count() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n > 0 { n as usize } else { 1 }
}

#[cfg(feature = "rt")]
fn classify(operation: &'static str, errno: nix::errno::Errno) -> RtConfigError {
    use nix::errno::Errno;
    match errno {
        Errno::EPERM | Errno::ENOMEM => RtConfigError::InsufficientPrivilege {
            operation,
            detail: errno.desc().to_string(),
        },
        other => RtConfigError::Os {
            operation,
            detail: other.desc().to_string(),
        },
    }
}

#[cfg(feature = "rt")]
fn lock_memory() -> Result<(), RtConfigError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| classify("mlockall", e))
}

#[cfg(not(feature = "rt"))]
fn lock_memory() -> Result<(), RtConfigError> {
    Ok(())
}

/// Touch the top of the stack so later calls do not page-fault.
fn prefault_stack() {
    let mut buf = [0u8; PREFAULT_STACK_BYTES];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Reserve and touch `bytes` of heap, then hand it back to the allocator
/// with trimming disabled so the pages stay resident.
#[cfg(feature = "rt")]
fn prefault_heap(bytes: usize) {
    #[cfg(target_env = "gnu")]
    unsafe {
        libc::mallopt(libc::M_TRIM_THRESHOLD, -1);
        libc::mallopt(libc::M_MMAP_MAX, 0);
    }

    let page = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    };
    let mut heap = vec![0u8; bytes];
    for offset in (0..bytes).step_by(page) {
        unsafe { core::ptr::write_volatile(heap.as_mut_ptr().add(offset), 0xFF) };
    }
    core::hint::black_box(&heap);
    debug!(bytes, "heap prefaulted");
}

#[cfg(not(feature = "rt"))]
fn prefault_heap(bytes: usize) {
    debug!(bytes, "heap prefault skipped (simulation)");
}

#[cfg(feature = "rt")]
fn set_affinity(cpus: &[usize]) -> Result<(), RtConfigError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)
            .map_err(|e| RtConfigError::InvalidAffinity(format!("CPU {cpu}: {}", e.desc())))?;
    }
    sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| classify("sched_setaffinity", e))
}

#[cfg(not(feature = "rt"))]
fn set_affinity(cpus: &[usize]) -> Result<(), RtConfigError> {
    debug!(?cpus, "affinity skipped (simulation)");
    Ok(())
}

#[cfg(feature = "rt")]
fn set_fifo_priority(priority: i32) -> Result<(), RtConfigError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        return Err(classify("sched_setscheduler", nix::errno::Errno::last()));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn set_fifo_priority(priority: i32) -> Result<(), RtConfigError> {
    debug!(priority, "SCHED_FIFO skipped (simulation)");
    Ok(())
}
