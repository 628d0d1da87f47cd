//! Periodic latency report on a background thread.
//!
//! The thread is spawned when the controller node is constructed, so it
//! inherits whatever scheduling attributes the process has at that moment.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::stats::LatencyStats;

struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

/// Handle to the reporter thread. Stops and joins on drop.
pub struct TelemetryReporter {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryReporter {
    /// Spawn a thread logging a summary of `stats` every `interval`.
    pub fn spawn(
        node: &str,
        interval: Duration,
        stats: Arc<Mutex<LatencyStats>>,
    ) -> io::Result<Self> {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let node_name = node.to_string();

        let handle = thread::Builder::new()
            .name(format!("{node}-telemetry"))
            .spawn(move || {
                let mut stopped = thread_signal.stopped.lock();
                while !*stopped {
                    thread_signal.cv.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    let s = stats.lock().clone();
                    if s.count > 0 {
                        info!(
                            node = %node_name,
                            samples = s.count,
                            min_us = s.min_or_zero() / 1000,
                            avg_us = s.avg_ns() / 1000,
                            max_us = s.max_ns / 1000,
                            missed_deadlines = s.missed_deadlines,
                            "update latency"
                        );
                    }
                }
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.cv.notify_all();
        if handle.join().is_err() {
            warn!("telemetry thread panicked");
        }
    }
}

impl Drop for TelemetryReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
