//! Pendulum messages exchanged with the controller component.
//!
//! Angles are in radians with π being the upright pole position. All types
//! are `Copy` so the dispatch loop never allocates to move them.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Measured cart/pole state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    /// Cart position [m].
    pub cart_position: f64,
    /// Cart velocity [m/s].
    pub cart_velocity: f64,
    /// Pole angle [rad].
    pub pole_angle: f64,
    /// Pole angular velocity [rad/s].
    pub pole_velocity: f64,
    /// Total force currently applied to the cart [N].
    pub cart_force: f64,
}

impl JointState {
    /// State vector used by the feedback law.
    #[inline]
    pub const fn as_vector(&self) -> [f64; 4] {
        [
            self.cart_position,
            self.cart_velocity,
            self.pole_angle,
            self.pole_velocity,
        ]
    }
}

impl Default for JointState {
    fn default() -> Self {
        Self {
            cart_position: 0.0,
            cart_velocity: 0.0,
            pole_angle: PI,
            pole_velocity: 0.0,
            cart_force: 0.0,
        }
    }
}

/// Setpoint for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Teleop {
    pub cart_position: f64,
    pub cart_velocity: f64,
    pub pole_angle: f64,
    pub pole_velocity: f64,
}

impl Teleop {
    #[inline]
    pub const fn as_vector(&self) -> [f64; 4] {
        [
            self.cart_position,
            self.cart_velocity,
            self.pole_angle,
            self.pole_velocity,
        ]
    }
}

impl Default for Teleop {
    fn default() -> Self {
        Self {
            cart_position: 0.0,
            cart_velocity: 0.0,
            pole_angle: PI,
            pole_velocity: 0.0,
        }
    }
}

/// Force command produced by the controller [N].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointCommand {
    pub force: f64,
}

/// Inbound message routed to a component by the executor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// New measurement from the pendulum driver.
    JointState(JointState),
    /// Full setpoint update.
    Teleop(Teleop),
    /// Cart-only setpoint update; pole reference is kept.
    CartSetpoint { position: f64, velocity: f64 },
}
