//! Managed lifecycle components.
//!
//! A [`LifecycleNode`] provides the callbacks; [`ManagedNode`] owns the
//! current state and runs the transition table from
//! `pendulum_common::lifecycle`. The managed node is also the executor
//! endpoint: timers fire only while `Active`, messages are accepted while
//! `Inactive` or `Active`, and external transition requests are serialized
//! with every other callback.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pendulum_common::data::Message;
use pendulum_common::lifecycle::{LifecycleState, Transition};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::executor::{ExecutorFault, Schedulable, TimerTick};

/// Failure reported by a node callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Callbacks of a lifecycle-managed component. All have no-op defaults.
pub trait LifecycleNode: Send {
    /// Unconfigured → Inactive.
    fn on_configure(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Inactive → Active.
    fn on_activate(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Active → Inactive.
    fn on_deactivate(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Inactive → Unconfigured.
    fn on_cleanup(&mut self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Any primary state → Finalized.
    fn on_shutdown(&mut self, _from: LifecycleState) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called in `ErrorProcessing` after a failed transition out of `from`.
    /// `Ok` recovers to `Unconfigured`, `Err` finalizes the node.
    fn on_error(&mut self, _from: LifecycleState) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Period of the update timer while `Active`.
    fn update_period(&self) -> Option<Duration> {
        None
    }

    /// Periodic work while `Active`. An error is a fatal fault.
    fn on_update(&mut self, _tick: &TimerTick) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Inbound message while `Inactive` or `Active`.
    fn on_message(&mut self, _msg: Message) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Rejected or failed lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The table has no edge from the current state.
    #[error("{node}: cannot {} from {from:?}", .transition.label())]
    InvalidTransition {
        node: String,
        from: LifecycleState,
        transition: Transition,
    },

    /// `target` is not one transition away.
    #[error("{node}: {target:?} is not reachable from {from:?}")]
    Unreachable {
        node: String,
        from: LifecycleState,
        target: LifecycleState,
    },

    /// The callback failed; `state` is where error processing left the node.
    #[error("{node}: {} failed: {reason} (now {state:?})", .transition.label())]
    CallbackFailed {
        node: String,
        transition: Transition,
        reason: String,
        state: LifecycleState,
    },
}

/// Shared handle used by the orchestrator and the executor.
pub type NodeHandle<N> = Arc<Mutex<ManagedNode<N>>>;

/// Node plus its lifecycle state.
pub struct ManagedNode<N> {
    name: String,
    state: LifecycleState,
    node: N,
}

impl<N: LifecycleNode> ManagedNode<N> {
    /// New node in `Unconfigured`.
    pub fn new(name: impl Into<String>, node: N) -> Self {
        Self {
            name: name.into(),
            state: LifecycleState::Unconfigured,
            node,
        }
    }

    pub fn into_handle(self) -> NodeHandle<N> {
        Arc::new(Mutex::new(self))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn current_state(&self) -> LifecycleState {
        self.state
    }

    #[inline]
    pub fn node(&self) -> &N {
        &self.node
    }

    #[inline]
    pub fn node_mut(&mut self) -> &mut N {
        &mut self.node
    }

    /// Move to `target` through the single transition leading there.
    /// Requesting the current state is a no-op.
    pub fn request_transition(
        &mut self,
        target: LifecycleState,
    ) -> Result<LifecycleState, TransitionError> {
        if self.state == target {
            return Ok(target);
        }
        match Transition::towards(self.state, target) {
            Some(transition) => self.trigger(transition),
            None => Err(TransitionError::Unreachable {
                node: self.name.clone(),
                from: self.state,
                target,
            }),
        }
    }

    /// Run one transition and its callback.
    pub fn trigger(&mut self, transition: Transition) -> Result<LifecycleState, TransitionError> {
        let from = self.state;
        let Some(goal) = transition.goal(from) else {
            return Err(TransitionError::InvalidTransition {
                node: self.name.clone(),
                from,
                transition,
            });
        };

        let result = match transition {
            Transition::Configure => self.node.on_configure(),
            Transition::Activate => self.node.on_activate(),
            Transition::Deactivate => self.node.on_deactivate(),
            Transition::Cleanup => self.node.on_cleanup(),
            Transition::Shutdown => self.node.on_shutdown(from),
        };

        match result {
            Ok(()) => {
                self.state = goal;
                info!(node = %self.name, transition = transition.label(), ?from, to = ?goal, "transition");
                Ok(goal)
            }
            Err(CallbackError(reason)) => {
                self.state = LifecycleState::ErrorProcessing;
                debug!(node = %self.name, transition = transition.label(), %reason, "transition failed");
                self.state = match self.node.on_error(from) {
                    Ok(()) => LifecycleState::Unconfigured,
                    Err(e) => {
                        warn!(node = %self.name, reason = %e, "error processing failed, finalizing");
                        LifecycleState::Finalized
                    }
                };
                Err(TransitionError::CallbackFailed {
                    node: self.name.clone(),
                    transition,
                    reason,
                    state: self.state,
                })
            }
        }
    }

    fn fault(&self, e: CallbackError) -> ExecutorFault {
        ExecutorFault::new(self.name.clone(), e.0)
    }
}

impl<N: LifecycleNode> Schedulable for ManagedNode<N> {
    fn timer_period(&self) -> Option<Duration> {
        match self.state {
            LifecycleState::Active => self.node.update_period(),
            _ => None,
        }
    }

    fn on_timer(&mut self, tick: &TimerTick) -> Result<(), ExecutorFault> {
        if self.state != LifecycleState::Active {
            return Ok(());
        }
        self.node.on_update(tick).map_err(|e| self.fault(e))
    }

    fn on_message(&mut self, msg: Message) -> Result<(), ExecutorFault> {
        match self.state {
            LifecycleState::Inactive | LifecycleState::Active => {
                self.node.on_message(msg).map_err(|e| self.fault(e))
            }
            state => {
                debug!(node = %self.name, ?state, "message ignored");
                Ok(())
            }
        }
    }

    /// Rejected or failed requests are logged; the node keeps running in
    /// whatever state error processing left it.
    fn on_transition_request(&mut self, target: LifecycleState) -> Result<(), ExecutorFault> {
        if let Err(e) = self.request_transition(target) {
            warn!("transition request rejected: {e}");
        }
        Ok(())
    }
}
