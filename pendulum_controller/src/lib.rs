//! # Pendulum Controller Library
//!
//! Real-time bootstrap for a lifecycle-managed inverted-pendulum controller.
//!
//! ## Building Blocks
//!
//! 1. **RealTimeConfigurator** (`rt`): memory locking, CPU affinity,
//!    SCHED_FIFO priority
//! 2. **BoundedExecutor** (`executor`): fixed-capacity, single-threaded
//!    dispatch loop with explicit backpressure
//! 3. **ManagedNode** (`lifecycle`): lifecycle state machine around a node's
//!    callbacks
//! 4. **Bootstrap** (`bootstrap`): ordering of RT configuration relative to
//!    component creation, auto-start, blocking run, ordered teardown
//!
//! The controller itself (`controller`) is one such node: a linear
//! state-feedback law driven by a periodic update timer.
//!
//! ## Simulation Mode
//!
//! Without the `rt` feature every RT system call is validated but skipped,
//! so the whole stack runs unprivileged (tests, CI, development hosts).

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod rt;
pub mod stats;

pub use bootstrap::{Bootstrap, BootstrapPhase, BootstrapReport, RtOrdering, bootstrap};
pub use error::{BootstrapError, EXIT_OK, EXIT_RECOGNIZED_FAULT, EXIT_UNKNOWN_FAULT};
pub use executor::{BoundedExecutor, ExecutorConfig, ExecutorVariant, QueueSize, create_executor};
pub use rt::{RealTimeConfigurator, SchedulingConfigurator};
