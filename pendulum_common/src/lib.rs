//! Pendulum Common Library
//!
//! Shared constants, configuration loading and wire-level types for the
//! pendulum real-time workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide numeric limits and defaults
//! - [`config`] - Configuration loading traits and types
//! - [`process`] - Process real-time settings
//! - [`lifecycle`] - Lifecycle states and the transition table
//! - [`data`] - Pendulum state, setpoint and command messages
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use pendulum_common::prelude::*;
//!
//! let settings = ProcessRealTimeConfig::default();
//! assert!(!settings.is_realtime_requested());
//! ```

pub mod config;
pub mod consts;
pub mod data;
pub mod lifecycle;
pub mod prelude;
pub mod process;
