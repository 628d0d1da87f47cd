//! Linear state feedback `u = -Σ K[i]·(x[i] − r[i])`.

use pendulum_common::data::{JointState, Teleop};

/// Full-state feedback controller for the cart/pole.
#[derive(Debug, Clone, PartialEq)]
pub struct PendulumController {
    feedback: [f64; 4],
    state: JointState,
    teleop: Teleop,
    force_command: f64,
}

impl PendulumController {
    /// New controller reset to the upright reference.
    pub fn new(feedback: [f64; 4]) -> Self {
        let mut c = Self {
            feedback,
            state: JointState::default(),
            teleop: Teleop::default(),
            force_command: 0.0,
        };
        c.reset();
        c
    }

    /// Upright pole, cart at the origin, both for state and reference.
    pub fn reset(&mut self) {
        self.state = JointState::default();
        self.teleop = Teleop::default();
        self.force_command = 0.0;
    }

    /// Recompute the force command from the latest state and reference.
    pub fn update(&mut self) -> f64 {
        self.force_command = self.calculate(&self.state.as_vector(), &self.teleop.as_vector());
        self.force_command
    }

    #[inline]
    pub fn calculate(&self, state: &[f64; 4], reference: &[f64; 4]) -> f64 {
        self.feedback
            .iter()
            .zip(state.iter().zip(reference))
            .map(|(k, (x, r))| -k * (x - r))
            .sum()
    }

    #[inline]
    pub fn set_state(&mut self, state: JointState) {
        self.state = state;
    }

    #[inline]
    pub fn set_teleop(&mut self, teleop: Teleop) {
        self.teleop = teleop;
    }

    /// Cart-only setpoint; the pole reference is kept.
    #[inline]
    pub fn set_teleop_cart(&mut self, position: f64, velocity: f64) {
        self.teleop.cart_position = position;
        self.teleop.cart_velocity = velocity;
    }

    #[inline]
    pub fn state(&self) -> &JointState {
        &self.state
    }

    #[inline]
    pub fn teleop(&self) -> &Teleop {
        &self.teleop
    }

    #[inline]
    pub fn force_command(&self) -> f64 {
        self.force_command
    }

    #[inline]
    pub fn feedback(&self) -> &[f64; 4] {
        &self.feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::DEFAULT_FEEDBACK_MATRIX;
    use std::f64::consts::PI;

    #[test]
    fn zero_error_gives_zero_force() {
        let mut c = PendulumController::new(DEFAULT_FEEDBACK_MATRIX);
        assert_eq!(c.update(), 0.0);
    }

    #[test]
    fn force_is_negative_weighted_error() {
        let mut c = PendulumController::new([1.0, 2.0, 3.0, 4.0]);
        c.set_state(JointState {
            cart_position: 1.0,
            cart_velocity: 1.0,
            pole_angle: PI + 1.0,
            pole_velocity: 1.0,
            cart_force: 0.0,
        });
        assert!((c.update() - (-10.0)).abs() < 1e-12);
        assert_eq!(c.force_command(), c.update());
    }

    #[test]
    fn cart_setpoint_keeps_pole_reference() {
        let mut c = PendulumController::new(DEFAULT_FEEDBACK_MATRIX);
        c.set_teleop(Teleop {
            pole_angle: 3.0,
            ..Default::default()
        });
        c.set_teleop_cart(0.5, 0.1);
        assert_eq!(c.teleop().cart_position, 0.5);
        assert_eq!(c.teleop().cart_velocity, 0.1);
        assert_eq!(c.teleop().pole_angle, 3.0);
    }

    #[test]
    fn reset_restores_upright() {
        let mut c = PendulumController::new([1.0; 4]);
        c.set_state(JointState {
            pole_angle: 0.0,
            ..Default::default()
        });
        c.update();
        c.reset();
        assert_eq!(c.state().pole_angle, PI);
        assert_eq!(c.force_command(), 0.0);
    }
}
