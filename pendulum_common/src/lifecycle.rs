//! Lifecycle states and the transition table.
//!
//! ```text
//!                configure            activate
//! Unconfigured ───────────▶ Inactive ─────────▶ Active
//!      ▲         cleanup       │ ▲   deactivate    │
//!      └───────────────────────┘ └─────────────────┘
//!
//! shutdown: Unconfigured | Inactive | Active ──▶ Finalized
//! callback failure (any state) ──▶ ErrorProcessing ──▶ Unconfigured | Finalized
//! ```
//!
//! The table is a `const fn`, so the expected edges are asserted at compile
//! time below.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Lifecycle state of a managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, no resources configured.
    #[default]
    Unconfigured = 0,
    /// Configured, not processing periodic work.
    Inactive = 1,
    /// Fully operational.
    Active = 2,
    /// Terminal state.
    Finalized = 3,
    /// Transient state entered when a transition callback fails.
    ErrorProcessing = 4,
}

impl LifecycleState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unconfigured),
            1 => Some(Self::Inactive),
            2 => Some(Self::Active),
            3 => Some(Self::Finalized),
            4 => Some(Self::ErrorProcessing),
            _ => None,
        }
    }

    /// Primary states are the ones a component can rest in.
    #[inline]
    pub const fn is_primary(&self) -> bool {
        !matches!(self, Self::ErrorProcessing)
    }
}

/// Transition that moves a component between primary states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Transition {
    Configure = 0,
    Activate = 1,
    Deactivate = 2,
    Cleanup = 3,
    Shutdown = 4,
}

impl Transition {
    /// Primary state reached when the transition callback succeeds, or
    /// `None` if the transition is not valid from `from`.
    pub const fn goal(self, from: LifecycleState) -> Option<LifecycleState> {
        use LifecycleState::*;
        match (from, self) {
            (Unconfigured, Transition::Configure) => Some(Inactive),
            (Inactive, Transition::Activate) => Some(Active),
            (Active, Transition::Deactivate) => Some(Inactive),
            (Inactive, Transition::Cleanup) => Some(Unconfigured),
            (Unconfigured | Inactive | Active, Transition::Shutdown) => Some(Finalized),
            _ => None,
        }
    }

    /// Single transition that leads from `from` directly to `target`.
    pub const fn towards(from: LifecycleState, target: LifecycleState) -> Option<Transition> {
        use LifecycleState::*;
        match (from, target) {
            (Unconfigured, Inactive) => Some(Transition::Configure),
            (Inactive, Active) => Some(Transition::Activate),
            (Active, Inactive) => Some(Transition::Deactivate),
            (Inactive, Unconfigured) => Some(Transition::Cleanup),
            (Unconfigured | Inactive | Active, Finalized) => Some(Transition::Shutdown),
            _ => None,
        }
    }

    /// Human-readable label used in logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Cleanup => "cleanup",
            Self::Shutdown => "shutdown",
        }
    }
}

const fn is_edge(from: LifecycleState, t: Transition, to: LifecycleState) -> bool {
    match t.goal(from) {
        Some(goal) => goal as u8 == to as u8,
        None => false,
    }
}

const fn has_no_exit(from: LifecycleState) -> bool {
    Transition::Configure.goal(from).is_none()
        && Transition::Activate.goal(from).is_none()
        && Transition::Deactivate.goal(from).is_none()
        && Transition::Cleanup.goal(from).is_none()
        && Transition::Shutdown.goal(from).is_none()
}

const_assert!(is_edge(
    LifecycleState::Unconfigured,
    Transition::Configure,
    LifecycleState::Inactive
));
const_assert!(is_edge(
    LifecycleState::Inactive,
    Transition::Activate,
    LifecycleState::Active
));
const_assert!(is_edge(
    LifecycleState::Active,
    Transition::Deactivate,
    LifecycleState::Inactive
));
const_assert!(is_edge(
    LifecycleState::Active,
    Transition::Shutdown,
    LifecycleState::Finalized
));
const_assert!(has_no_exit(LifecycleState::Finalized));
const_assert!(has_no_exit(LifecycleState::ErrorProcessing));
