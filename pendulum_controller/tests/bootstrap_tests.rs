//! Bootstrap ordering, auto-start, fault and teardown behaviour.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pendulum_common::lifecycle::LifecycleState;
use pendulum_common::process::{CpuAffinity, ProcessRealTimeConfig};
use pendulum_controller::bootstrap::{Bootstrap, BootstrapPhase, BootstrapReport, RtOrdering, bootstrap};
use pendulum_controller::error::{BootstrapError, EXIT_OK, EXIT_RECOGNIZED_FAULT, EXIT_UNKNOWN_FAULT};
use pendulum_controller::executor::{ExecutorConfig, ExecutorState, TimerTick};
use pendulum_controller::lifecycle::{CallbackError, LifecycleNode};
use pendulum_controller::rt::{RtConfigError, SchedulingConfigurator};

// ─── Fixtures ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    RtConfigure,
    Construct,
    Configure,
    Activate,
    Update,
    Deactivate,
    Shutdown,
}

type Log = Arc<Mutex<Vec<Event>>>;

fn count(log: &Log, event: Event) -> usize {
    log.lock().iter().filter(|e| **e == event).count()
}

fn position(log: &Log, event: Event) -> Option<usize> {
    log.lock().iter().position(|e| *e == event)
}

struct RecordingConfigurator {
    log: Log,
    fail: bool,
}

impl SchedulingConfigurator for RecordingConfigurator {
    fn configure(&mut self, _config: &ProcessRealTimeConfig) -> Result<(), RtConfigError> {
        self.log.lock().push(Event::RtConfigure);
        if self.fail {
            return Err(RtConfigError::InsufficientPrivilege {
                operation: "sched_setscheduler",
                detail: "Operation not permitted".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default, Clone, Copy)]
enum UpdateBehaviour {
    #[default]
    Ok,
    FailAt(usize),
    PanicAt(usize),
}

/// Callback misbehaviour outside the update timer.
#[derive(Default, Clone, Copy)]
struct Faults {
    fail_activate: bool,
    panic_activate: bool,
    panic_shutdown: bool,
}

struct MockNode {
    log: Log,
    updates: usize,
    behaviour: UpdateBehaviour,
    faults: Faults,
}

impl LifecycleNode for MockNode {
    fn on_configure(&mut self) -> Result<(), CallbackError> {
        self.log.lock().push(Event::Configure);
        Ok(())
    }

    fn on_activate(&mut self) -> Result<(), CallbackError> {
        self.log.lock().push(Event::Activate);
        if self.faults.panic_activate {
            panic!("activate blew up");
        }
        if self.faults.fail_activate {
            return Err(CallbackError::new("actuator offline"));
        }
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<(), CallbackError> {
        self.log.lock().push(Event::Deactivate);
        Ok(())
    }

    fn on_shutdown(&mut self, _from: LifecycleState) -> Result<(), CallbackError> {
        self.log.lock().push(Event::Shutdown);
        if self.faults.panic_shutdown {
            panic!("shutdown blew up");
        }
        Ok(())
    }

    fn update_period(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }

    fn on_update(&mut self, _tick: &TimerTick) -> Result<(), CallbackError> {
        self.updates += 1;
        self.log.lock().push(Event::Update);
        match self.behaviour {
            UpdateBehaviour::FailAt(n) if self.updates == n => Err(CallbackError::new("sensor timeout")),
            UpdateBehaviour::PanicAt(n) if self.updates == n => panic!("update blew up"),
            _ => Ok(()),
        }
    }
}

struct Scenario {
    config: ProcessRealTimeConfig,
    fail_rt: bool,
    faults: Faults,
    behaviour: UpdateBehaviour,
    stop_after: Option<Duration>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            config: ProcessRealTimeConfig::default(),
            fail_rt: false,
            faults: Faults::default(),
            behaviour: UpdateBehaviour::Ok,
            stop_after: Some(Duration::ZERO),
        }
    }
}

fn rt_config(configure_child_threads: bool, auto_start: bool) -> ProcessRealTimeConfig {
    ProcessRealTimeConfig {
        configure_child_threads,
        scheduling_priority: 80,
        lock_memory: true,
        cpu_affinity: Some(CpuAffinity::new([0]).unwrap()),
        auto_start,
        ..Default::default()
    }
}

fn run(scenario: Scenario) -> (BootstrapReport, Log) {
    let log: Log = Arc::default();
    let configurator = RecordingConfigurator {
        log: Arc::clone(&log),
        fail: scenario.fail_rt,
    };
    let node_log = Arc::clone(&log);
    let behaviour = scenario.behaviour;
    let faults = scenario.faults;
    let stop_after = scenario.stop_after;

    let report = bootstrap(
        "mock",
        scenario.config,
        configurator,
        ExecutorConfig::default(),
        move || {
            node_log.lock().push(Event::Construct);
            Ok(MockNode {
                log: node_log,
                updates: 0,
                behaviour,
                faults,
            })
        },
        move |armed| {
            if let Some(delay) = stop_after {
                let stop = armed.stop_handle();
                thread::spawn(move || {
                    thread::sleep(delay);
                    stop.stop();
                });
            }
            Ok(())
        },
    );
    (report, log)
}

// ─── Ordering ───────────────────────────────────────────────────────

#[test]
fn child_threads_configure_before_creation() {
    let (report, log) = run(Scenario {
        config: rt_config(true, false),
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.ordering, RtOrdering::BeforeCreation);
    assert_eq!(count(&log, Event::RtConfigure), 1);
    assert!(position(&log, Event::RtConfigure) < position(&log, Event::Construct));
    assert_eq!(report.count(BootstrapPhase::ConfiguringPre), 1);
    assert_eq!(report.count(BootstrapPhase::ConfiguringPost), 0);
}

#[test]
fn no_child_threads_configure_after_creation() {
    let (report, log) = run(Scenario {
        config: rt_config(false, false),
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.ordering, RtOrdering::AfterCreation);
    assert_eq!(count(&log, Event::RtConfigure), 1);
    assert!(position(&log, Event::Construct) < position(&log, Event::RtConfigure));
    assert_eq!(report.count(BootstrapPhase::ConfiguringPre), 0);
    assert_eq!(report.count(BootstrapPhase::ConfiguringPost), 1);

    let post = report.phases.iter().position(|p| *p == BootstrapPhase::ConfiguringPost);
    let running = report.phases.iter().position(|p| *p == BootstrapPhase::Running);
    assert!(post < running);
}

#[test]
fn disabled_realtime_skips_both_phases() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            configure_child_threads: true,
            ..Default::default()
        },
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.ordering, RtOrdering::Disabled);
    assert_eq!(count(&log, Event::RtConfigure), 0);
    assert_eq!(report.count(BootstrapPhase::ConfiguringPre), 0);
    assert_eq!(report.count(BootstrapPhase::ConfiguringPost), 0);
}

// ─── Auto-start ─────────────────────────────────────────────────────

#[test]
fn auto_start_activates_before_run() {
    let log: Log = Arc::default();
    let armed = Bootstrap::new(
        rt_config(false, true),
        RecordingConfigurator {
            log: Arc::clone(&log),
            fail: false,
        },
    )
    .prepare()
    .and_then(|b| {
        let node_log = Arc::clone(&log);
        b.create(
            "mock",
            move || {
                Ok(MockNode {
                    log: node_log,
                    updates: 0,
                    behaviour: UpdateBehaviour::Ok,
                    faults: Faults::default(),
                })
            },
            ExecutorConfig::default(),
        )
    })
    .and_then(|b| b.settle_realtime())
    .and_then(|b| b.start())
    .ok()
    .expect("bootstrap should reach Armed");

    assert_eq!(armed.node().lock().current_state(), LifecycleState::Active);
    assert_eq!(count(&log, Event::Activate), 1);
    assert_eq!(armed.executor().state(), ExecutorState::Idle);

    armed.stop_handle().stop();
    let report = armed.run();
    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(count(&log, Event::Activate), 1);
}

#[test]
fn without_auto_start_component_waits_for_request() {
    let log: Log = Arc::default();
    let node_log = Arc::clone(&log);
    let seen_state = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&seen_state);

    let report = bootstrap(
        "mock",
        ProcessRealTimeConfig::default(),
        RecordingConfigurator {
            log: Arc::clone(&log),
            fail: false,
        },
        ExecutorConfig::default(),
        move || {
            Ok(MockNode {
                log: node_log,
                updates: 0,
                behaviour: UpdateBehaviour::Ok,
                faults: Faults::default(),
            })
        },
        move |armed| {
            *seen.lock() = Some(armed.node().lock().current_state());
            armed
                .submitter()
                .request_transition(armed.component_id(), LifecycleState::Active)
                .map_err(|e| BootstrapError::Component(e.to_string()))?;
            let stop = armed.stop_handle();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                stop.stop();
            });
            Ok(())
        },
    );

    assert_eq!(*seen_state.lock(), Some(LifecycleState::Inactive));
    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(count(&log, Event::Activate), 1);
    assert!(count(&log, Event::Update) > 0);
    assert!(position(&log, Event::Activate) < position(&log, Event::Update));
}

// ─── Faults ─────────────────────────────────────────────────────────

#[test]
fn fault_during_run_tears_down_once_and_exits_2() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            auto_start: true,
            ..Default::default()
        },
        behaviour: UpdateBehaviour::FailAt(3),
        stop_after: None,
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Executor(_))));
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(report.count(BootstrapPhase::Done), 1);
    assert_eq!(count(&log, Event::Update), 3);
    assert_eq!(count(&log, Event::Deactivate), 1);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert!(position(&log, Event::Deactivate) < position(&log, Event::Shutdown));
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
    assert!(report.teardown_errors.is_empty());
}

#[test]
fn panic_during_run_is_unknown_fault_with_teardown() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            auto_start: true,
            ..Default::default()
        },
        behaviour: UpdateBehaviour::PanicAt(2),
        stop_after: None,
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_UNKNOWN_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Unknown(m)) if m.contains("blew up")));
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
}

#[test]
fn failing_pre_configure_acquires_nothing() {
    let (report, log) = run(Scenario {
        config: rt_config(true, true),
        fail_rt: true,
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert!(matches!(
        report.error(),
        Some(BootstrapError::RealTime(RtConfigError::InsufficientPrivilege { .. }))
    ));
    assert_eq!(count(&log, Event::Construct), 0);
    assert_eq!(
        report.phases,
        vec![BootstrapPhase::Init, BootstrapPhase::ConfiguringPre, BootstrapPhase::Done]
    );
    assert_eq!(report.final_state, None);
}

#[test]
fn failing_post_configure_tears_down() {
    let (report, log) = run(Scenario {
        config: rt_config(false, true),
        fail_rt: true,
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert_eq!(report.count(BootstrapPhase::Running), 0);
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(count(&log, Event::Activate), 0);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
}

#[test]
fn failed_activation_aborts_bootstrap() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            auto_start: true,
            ..Default::default()
        },
        faults: Faults {
            fail_activate: true,
            ..Default::default()
        },
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Transition(_))));
    assert_eq!(report.count(BootstrapPhase::Running), 0);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
}

#[test]
fn panicking_activation_is_unknown_fault_with_teardown() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            auto_start: true,
            ..Default::default()
        },
        faults: Faults {
            panic_activate: true,
            ..Default::default()
        },
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_UNKNOWN_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Unknown(m)) if m.contains("activate blew up")));
    assert_eq!(report.count(BootstrapPhase::Running), 0);
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(report.count(BootstrapPhase::Done), 1);
    assert_eq!(count(&log, Event::Deactivate), 0);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
    assert!(report.teardown_errors.is_empty());
}

#[test]
fn panicking_shutdown_keeps_run_fault_exit_code() {
    let (report, log) = run(Scenario {
        config: ProcessRealTimeConfig {
            auto_start: true,
            ..Default::default()
        },
        behaviour: UpdateBehaviour::FailAt(2),
        faults: Faults {
            panic_shutdown: true,
            ..Default::default()
        },
        stop_after: None,
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Executor(_))));
    assert_eq!(report.teardown_errors.len(), 1);
    assert!(matches!(&report.teardown_errors[0], BootstrapError::Unknown(m) if m.contains("shutdown blew up")));
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(report.count(BootstrapPhase::Done), 1);
    assert_eq!(count(&log, Event::Deactivate), 1);
    assert_eq!(count(&log, Event::Shutdown), 1);
    // Shutdown never completed.
    assert_eq!(report.final_state, Some(LifecycleState::Inactive));
}

#[test]
fn factory_failure_exits_2() {
    let report = bootstrap(
        "mock",
        ProcessRealTimeConfig::default(),
        RecordingConfigurator {
            log: Arc::default(),
            fail: false,
        },
        ExecutorConfig::default(),
        || -> Result<MockNode, CallbackError> { Err(CallbackError::new("no device")) },
        |_armed| Ok(()),
    );

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert!(matches!(report.error(), Some(BootstrapError::Component(m)) if m == "no device"));
    assert_eq!(report.phases, vec![BootstrapPhase::Init, BootstrapPhase::Done]);
}

#[test]
fn armed_hook_failure_aborts_with_teardown() {
    let log: Log = Arc::default();
    let node_log = Arc::clone(&log);
    let report = bootstrap(
        "mock",
        ProcessRealTimeConfig::default(),
        RecordingConfigurator {
            log: Arc::clone(&log),
            fail: false,
        },
        ExecutorConfig::default(),
        move || {
            Ok(MockNode {
                log: node_log,
                updates: 0,
                behaviour: UpdateBehaviour::Ok,
                faults: Faults::default(),
            })
        },
        |_armed| Err(BootstrapError::Signal("handler already installed".into())),
    );

    assert_eq!(report.exit_code(), EXIT_RECOGNIZED_FAULT);
    assert_eq!(report.count(BootstrapPhase::Running), 0);
    assert_eq!(count(&log, Event::Shutdown), 1);
}

#[test]
fn panicking_armed_hook_tears_down() {
    let log: Log = Arc::default();
    let node_log = Arc::clone(&log);
    let report = bootstrap(
        "mock",
        ProcessRealTimeConfig::default(),
        RecordingConfigurator {
            log: Arc::clone(&log),
            fail: false,
        },
        ExecutorConfig::default(),
        move || {
            Ok(MockNode {
                log: node_log,
                updates: 0,
                behaviour: UpdateBehaviour::Ok,
                faults: Faults::default(),
            })
        },
        |_armed| -> Result<(), BootstrapError> { panic!("hook blew up") },
    );

    assert_eq!(report.exit_code(), EXIT_UNKNOWN_FAULT);
    assert_eq!(report.count(BootstrapPhase::Running), 0);
    assert_eq!(report.count(BootstrapPhase::ShuttingDown), 1);
    assert_eq!(count(&log, Event::Shutdown), 1);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
}

// ─── End to end ─────────────────────────────────────────────────────

#[test]
fn post_ordering_with_auto_start_runs_until_stopped() {
    let (report, log) = run(Scenario {
        config: rt_config(false, true),
        stop_after: Some(Duration::from_millis(50)),
        ..Default::default()
    });

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(
        report.phases,
        vec![
            BootstrapPhase::Init,
            BootstrapPhase::ComponentCreated,
            BootstrapPhase::ConfiguringPost,
            BootstrapPhase::Starting,
            BootstrapPhase::Running,
            BootstrapPhase::ShuttingDown,
            BootstrapPhase::Done,
        ]
    );

    let events = log.lock().clone();
    let first_update = events.iter().position(|e| *e == Event::Update);
    assert!(first_update.is_some());
    assert_eq!(
        &events[..4],
        &[Event::Construct, Event::Configure, Event::RtConfigure, Event::Activate]
    );
    assert_eq!(&events[events.len() - 2..], &[Event::Deactivate, Event::Shutdown]);
    assert_eq!(report.final_state, Some(LifecycleState::Finalized));
}

#[cfg(not(feature = "rt"))]
#[test]
fn real_configurator_in_simulation_mode() {
    use pendulum_controller::rt::{AppliedAttributes, RealTimeConfigurator};

    let log: Log = Arc::default();
    let node_log = Arc::clone(&log);
    let report = bootstrap(
        "mock",
        rt_config(true, true),
        RealTimeConfigurator::with_host_cpus(1),
        ExecutorConfig::default(),
        move || {
            Ok(MockNode {
                log: node_log,
                updates: 0,
                behaviour: UpdateBehaviour::Ok,
                faults: Faults::default(),
            })
        },
        |armed| {
            assert_eq!(
                armed.configurator().applied(),
                AppliedAttributes::MEMORY_LOCKED
                    | AppliedAttributes::AFFINITY
                    | AppliedAttributes::PRIORITY
            );
            armed.stop_handle().stop();
            Ok(())
        },
    );
    assert_eq!(report.exit_code(), EXIT_OK);
}
