//! Controller lifecycle node.
//!
//! Joint states and setpoints arrive as executor messages; the update timer
//! (armed only while `Active`) recomputes the force and publishes it.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pendulum_common::data::{JointCommand, Message};
use pendulum_common::lifecycle::LifecycleState;
use tracing::{info, warn};

use super::law::PendulumController;
use super::telemetry::TelemetryReporter;
use super::ControllerSettings;
use crate::executor::TimerTick;
use crate::lifecycle::{CallbackError, LifecycleNode};
use crate::stats::LatencyStats;

/// Output port for force commands.
pub trait CommandPublisher: Send {
    fn publish(&mut self, cmd: JointCommand);
}

impl<F: FnMut(JointCommand) + Send> CommandPublisher for F {
    fn publish(&mut self, cmd: JointCommand) {
        self(cmd)
    }
}

pub struct PendulumControllerNode<P> {
    name: String,
    controller: PendulumController,
    publisher: P,
    settings: ControllerSettings,
    stats: Arc<Mutex<LatencyStats>>,
    telemetry: Option<TelemetryReporter>,
}

impl<P: CommandPublisher> PendulumControllerNode<P> {
    /// Build the node and start its telemetry thread (if enabled).
    pub fn new(
        name: impl Into<String>,
        settings: ControllerSettings,
        publisher: P,
    ) -> Result<Self, CallbackError> {
        let name = name.into();
        let stats = Arc::new(Mutex::new(LatencyStats::new()));
        let telemetry = match settings.telemetry_interval() {
            Some(interval) => Some(
                TelemetryReporter::spawn(&name, interval, Arc::clone(&stats))
                    .map_err(|e| CallbackError::new(format!("telemetry thread: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            controller: PendulumController::new(settings.feedback_matrix),
            name,
            publisher,
            settings,
            stats,
            telemetry,
        })
    }

    #[inline]
    pub fn controller(&self) -> &PendulumController {
        &self.controller
    }

    /// Snapshot of the update-loop latency statistics.
    pub fn stats(&self) -> LatencyStats {
        self.stats.lock().clone()
    }

    pub fn telemetry_running(&self) -> bool {
        self.telemetry.as_ref().is_some_and(TelemetryReporter::is_running)
    }

    fn write_latency_report(&self) {
        let Some(path) = &self.settings.latency_report else {
            return;
        };
        let stats = self.stats.lock().clone();
        let result = File::create(path).and_then(|f| stats.write_csv(BufWriter::new(f)));
        match result {
            Ok(()) => info!(path = %path.display(), "latency report written"),
            Err(e) => warn!(path = %path.display(), "latency report failed: {e}"),
        }
    }
}

impl<P: CommandPublisher> LifecycleNode for PendulumControllerNode<P> {
    fn on_configure(&mut self) -> Result<(), CallbackError> {
        self.controller.reset();
        *self.stats.lock() = LatencyStats::new();
        Ok(())
    }

    fn on_activate(&mut self) -> Result<(), CallbackError> {
        info!(node = %self.name, period_us = self.settings.update_period_us, "controller active");
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<(), CallbackError> {
        let s = self.controller.state();
        info!(
            node = %self.name,
            cart_position = s.cart_position,
            pole_angle = s.pole_angle,
            force = self.controller.force_command(),
            "controller deactivated"
        );
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<(), CallbackError> {
        self.controller.reset();
        Ok(())
    }

    fn on_shutdown(&mut self, _from: LifecycleState) -> Result<(), CallbackError> {
        if let Some(mut telemetry) = self.telemetry.take() {
            telemetry.stop();
        }
        self.write_latency_report();
        Ok(())
    }

    fn on_error(&mut self, from: LifecycleState) -> Result<(), CallbackError> {
        warn!(node = %self.name, ?from, "resetting controller after error");
        self.controller.reset();
        Ok(())
    }

    fn update_period(&self) -> Option<Duration> {
        Some(self.settings.update_period())
    }

    fn on_update(&mut self, tick: &TimerTick) -> Result<(), CallbackError> {
        let latency_ns = i64::try_from(tick.latency().as_nanos()).unwrap_or(i64::MAX);
        let deadline_ns = (self.settings.deadline_us as i64).saturating_mul(1000);
        self.stats.lock().record(latency_ns, deadline_ns, tick.missed);

        let force = self.controller.update();
        self.publisher.publish(JointCommand { force });
        Ok(())
    }

    fn on_message(&mut self, msg: Message) -> Result<(), CallbackError> {
        match msg {
            Message::JointState(state) => self.controller.set_state(state),
            Message::Teleop(teleop) => self.controller.set_teleop(teleop),
            Message::CartSetpoint { position, velocity } => {
                self.controller.set_teleop_cart(position, velocity)
            }
        }
        Ok(())
    }
}
