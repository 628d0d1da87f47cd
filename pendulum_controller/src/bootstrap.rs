//! Real-time bootstrap orchestrator.
//!
//! ```text
//! Init ─▶ ConfiguringPre ─▶ ComponentCreated ─▶ ConfiguringPost ─▶ Starting ─▶ Running
//!                                                                               │
//!                                               Done ◀── ShuttingDown ◀─────────┘
//! ```
//!
//! `configure_child_threads` decides when the process RT attributes are
//! applied relative to component creation:
//! - `true`: in `ConfiguringPre`, before the component exists, so every
//!   thread it spawns inherits them.
//! - `false`: in `ConfiguringPost`, after creation, so only the dispatch
//!   thread gets them.
//!
//! Exactly one of the two phases runs; neither when no RT attribute is
//! requested. The order is a typestate:
//!
//! ```text
//! Bootstrap<C, Init> ─prepare()─▶ Bootstrap<C, Prepared>
//!     ─create()─▶ Bootstrap<C, Created<N>> ─settle_realtime()─▶ Bootstrap<C, Configured<N>>
//!     ─start()─▶ Bootstrap<C, Armed<N>> ─run()─▶ BootstrapReport
//! ```
//!
//! so `run()` cannot be reached without passing the RT phase. Every step
//! after the component is created tears down what was acquired on failure:
//! `destroy_all()` on the executor, then deactivate and shut down the
//! component. Teardown failures are recorded but never replace the error
//! that ended the bootstrap.
//!
//! Component callbacks can panic at any step. Each callback-driving step
//! runs under `catch_unwind`, so a panic becomes an unknown fault (exit -1)
//! and still goes through teardown. A panic during teardown is recorded
//! like any other teardown failure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use pendulum_common::lifecycle::{LifecycleState, Transition};
use pendulum_common::process::ProcessRealTimeConfig;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, EXIT_OK};
use crate::executor::{
    BoundedExecutor, ComponentId, ExecutorConfig, ExecutorState, StopHandle, Submitter,
};
use crate::lifecycle::{CallbackError, LifecycleNode, ManagedNode, NodeHandle};
use crate::rt::SchedulingConfigurator;

// ─── Phases ─────────────────────────────────────────────────────────

/// Orchestrator phase, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Init,
    ConfiguringPre,
    ComponentCreated,
    ConfiguringPost,
    Starting,
    Running,
    ShuttingDown,
    Done,
}

/// When RT attributes are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtOrdering {
    BeforeCreation,
    AfterCreation,
    Disabled,
}

impl RtOrdering {
    pub fn for_config(config: &ProcessRealTimeConfig) -> Self {
        if !config.is_realtime_requested() {
            Self::Disabled
        } else if config.configure_child_threads {
            Self::BeforeCreation
        } else {
            Self::AfterCreation
        }
    }
}

// ─── Report ─────────────────────────────────────────────────────────

/// Outcome of a bootstrap, from any phase.
#[derive(Debug)]
pub struct BootstrapReport {
    /// Phases entered, in order.
    pub phases: Vec<BootstrapPhase>,
    pub ordering: RtOrdering,
    /// The error that ended the bootstrap, if any.
    pub outcome: Result<(), BootstrapError>,
    /// Failures during teardown, logged and kept for inspection.
    pub teardown_errors: Vec<BootstrapError>,
    /// Component state after teardown (`None` if it was never created).
    pub final_state: Option<LifecycleState>,
}

impl BootstrapReport {
    /// 0 on clean shutdown, otherwise the exit code of the fatal error.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(()) => EXIT_OK,
            Err(e) => e.exit_code(),
        }
    }

    pub fn error(&self) -> Option<&BootstrapError> {
        self.outcome.as_ref().err()
    }

    /// Number of times `phase` was entered.
    pub fn count(&self, phase: BootstrapPhase) -> usize {
        self.phases.iter().filter(|p| **p == phase).count()
    }
}

// ─── Typestate ──────────────────────────────────────────────────────

/// Nothing acquired yet.
pub struct Init;

/// Pre-creation RT phase done (or skipped).
pub struct Prepared;

/// Resources held once the component exists.
struct Acquired<N> {
    node: NodeHandle<N>,
    executor: BoundedExecutor,
    id: ComponentId,
}

/// Component created, configured and attached.
pub struct Created<N>(Acquired<N>);

/// RT attributes settled for this run.
pub struct Configured<N>(Acquired<N>);

/// Ready for the blocking `run()`.
pub struct Armed<N>(Acquired<N>);

/// Bootstrap orchestrator in stage `S`.
pub struct Bootstrap<C, S> {
    config: ProcessRealTimeConfig,
    configurator: C,
    ordering: RtOrdering,
    phases: Vec<BootstrapPhase>,
    stage: S,
}

impl<C, S> Bootstrap<C, S> {
    fn enter(&mut self, phase: BootstrapPhase) {
        debug!(?phase, "bootstrap phase");
        self.phases.push(phase);
    }

    fn advance<T>(self, stage: T) -> Bootstrap<C, T> {
        Bootstrap {
            config: self.config,
            configurator: self.configurator,
            ordering: self.ordering,
            phases: self.phases,
            stage,
        }
    }

    #[inline]
    pub fn ordering(&self) -> RtOrdering {
        self.ordering
    }

    #[inline]
    pub fn phases(&self) -> &[BootstrapPhase] {
        &self.phases
    }

    #[inline]
    pub fn config(&self) -> &ProcessRealTimeConfig {
        &self.config
    }

    #[inline]
    pub fn configurator(&self) -> &C {
        &self.configurator
    }

    /// Failure before anything was acquired.
    fn fail_early(mut self, error: BootstrapError) -> BootstrapReport {
        self.enter(BootstrapPhase::Done);
        BootstrapReport {
            phases: self.phases,
            ordering: self.ordering,
            outcome: Err(error),
            teardown_errors: Vec::new(),
            final_state: None,
        }
    }
}

impl<C: SchedulingConfigurator> Bootstrap<C, Init> {
    pub fn new(config: ProcessRealTimeConfig, configurator: C) -> Self {
        let ordering = RtOrdering::for_config(&config);
        Self {
            config,
            configurator,
            ordering,
            phases: vec![BootstrapPhase::Init],
            stage: Init,
        }
    }

    /// Apply RT attributes now if child threads must inherit them.
    pub fn prepare(mut self) -> Result<Bootstrap<C, Prepared>, BootstrapReport> {
        info!(ordering = ?self.ordering, "bootstrap starting");
        if self.ordering == RtOrdering::BeforeCreation {
            self.enter(BootstrapPhase::ConfiguringPre);
            let configured = guarded(|| Ok(self.configurator.configure(&self.config)?));
            if let Err(e) = configured {
                return Err(self.fail_early(e));
            }
        }
        Ok(self.advance(Prepared))
    }
}

impl<C: SchedulingConfigurator> Bootstrap<C, Prepared> {
    /// Create the component, then the executor, attach, and configure the
    /// component (`Unconfigured → Inactive`).
    pub fn create<N, F>(
        mut self,
        name: &str,
        factory: F,
        executor: ExecutorConfig,
    ) -> Result<Bootstrap<C, Created<N>>, BootstrapReport>
    where
        N: LifecycleNode + 'static,
        F: FnOnce() -> Result<N, CallbackError>,
    {
        let node = match guarded(|| factory().map_err(|e| BootstrapError::Component(e.0))) {
            Ok(node) => ManagedNode::new(name, node).into_handle(),
            Err(e) => return Err(self.fail_early(e)),
        };
        self.enter(BootstrapPhase::ComponentCreated);

        let exec = match BoundedExecutor::create(executor) {
            Ok(exec) => exec,
            Err(e) => return Err(teardown(self, &node, None, Err(e.into()))),
        };
        let id = match exec.attach(name, Arc::clone(&node)) {
            Ok(id) => id,
            Err(e) => return Err(teardown(self, &node, Some(&exec), Err(e.into()))),
        };
        let configured = guarded(|| {
            node.lock().request_transition(LifecycleState::Inactive)?;
            Ok(())
        });
        if let Err(e) = configured {
            return Err(teardown(self, &node, Some(&exec), Err(e)));
        }

        info!(component = name, capacity = exec.capacity(), "component attached");
        Ok(self.advance(Created(Acquired {
            node,
            executor: exec,
            id,
        })))
    }
}

impl<C: SchedulingConfigurator, N: LifecycleNode> Bootstrap<C, Created<N>> {
    /// Apply RT attributes now unless they were applied before creation.
    pub fn settle_realtime(mut self) -> Result<Bootstrap<C, Configured<N>>, BootstrapReport> {
        if self.ordering == RtOrdering::AfterCreation {
            self.enter(BootstrapPhase::ConfiguringPost);
            let configured = guarded(|| Ok(self.configurator.configure(&self.config)?));
            if let Err(e) = configured {
                let (this, acq) = self.split(|Created(acq)| acq);
                return Err(teardown(this, &acq.node, Some(&acq.executor), Err(e)));
            }
        }
        let (this, acq) = self.split(|Created(acq)| acq);
        Ok(this.advance(Configured(acq)))
    }
}

impl<C: SchedulingConfigurator, N: LifecycleNode> Bootstrap<C, Configured<N>> {
    /// Activate the component if `auto_start` is set.
    pub fn start(mut self) -> Result<Bootstrap<C, Armed<N>>, BootstrapReport> {
        self.enter(BootstrapPhase::Starting);
        if self.config.auto_start {
            let node = &self.stage.0.node;
            let activated = guarded(|| {
                node.lock().request_transition(LifecycleState::Active)?;
                Ok(())
            });
            if let Err(e) = activated {
                let (this, acq) = self.split(|Configured(acq)| acq);
                return Err(teardown(this, &acq.node, Some(&acq.executor), Err(e)));
            }
        }
        let (this, acq) = self.split(|Configured(acq)| acq);
        Ok(this.advance(Armed(acq)))
    }
}

impl<C, S> Bootstrap<C, S> {
    fn split<N>(self, f: impl FnOnce(S) -> Acquired<N>) -> (Bootstrap<C, ()>, Acquired<N>) {
        let acq = f(self.stage);
        (
            Bootstrap {
                config: self.config,
                configurator: self.configurator,
                ordering: self.ordering,
                phases: self.phases,
                stage: (),
            },
            acq,
        )
    }
}

impl<C, N: LifecycleNode + 'static> Bootstrap<C, Armed<N>> {
    pub fn component_id(&self) -> ComponentId {
        self.stage.0.id
    }

    pub fn node(&self) -> NodeHandle<N> {
        Arc::clone(&self.stage.0.node)
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.stage.0.executor
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stage.0.executor.stop_handle()
    }

    pub fn submitter(&self) -> Submitter {
        self.stage.0.executor.submitter()
    }

    /// Block in the dispatch loop, then tear down. Panics escaping the loop
    /// are reported as unknown faults.
    pub fn run(mut self) -> BootstrapReport {
        self.enter(BootstrapPhase::Running);
        let (this, acq) = self.split(|Armed(acq)| acq);

        let outcome = guarded(|| Ok(acq.executor.run()?));
        teardown(this, &acq.node, Some(&acq.executor), outcome)
    }

    /// Tear down without running, e.g. when installing a signal handler
    /// failed.
    pub fn abort(self, error: BootstrapError) -> BootstrapReport {
        let (this, acq) = self.split(|Armed(acq)| acq);
        teardown(this, &acq.node, Some(&acq.executor), Err(error))
    }
}

// ─── Teardown ───────────────────────────────────────────────────────

/// Release in reverse acquisition order: executor first, then component.
/// Both are attempted even if the first fails.
fn teardown<C, S, N: LifecycleNode>(
    mut this: Bootstrap<C, S>,
    node: &NodeHandle<N>,
    executor: Option<&BoundedExecutor>,
    outcome: Result<(), BootstrapError>,
) -> BootstrapReport {
    this.enter(BootstrapPhase::ShuttingDown);
    let mut errors = Vec::new();

    if let Some(exec) = executor {
        if exec.state() != ExecutorState::Destroyed {
            if let Err(e) = guarded(|| Ok(exec.destroy_all()?)) {
                errors.push(e);
            }
        }
    }

    // A panicking callback leaves the node in its previous state, so
    // shutdown is still attempted after a failed deactivate.
    for transition in [Transition::Deactivate, Transition::Shutdown] {
        let result = guarded(|| {
            let mut node = node.lock();
            let state = node.current_state();
            let due = match transition {
                Transition::Deactivate => state == LifecycleState::Active,
                _ => transition.goal(state).is_some(),
            };
            if due {
                node.trigger(transition)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            errors.push(e);
        }
    }
    let final_state = node.lock().current_state();

    for e in &errors {
        warn!("teardown: {e}");
    }
    this.enter(BootstrapPhase::Done);
    info!(?final_state, "bootstrap finished");

    BootstrapReport {
        phases: this.phases,
        ordering: this.ordering,
        outcome,
        teardown_errors: errors,
        final_state: Some(final_state),
    }
}

/// Run `f`, turning a panic into an unknown fault.
fn guarded<T>(f: impl FnOnce() -> Result<T, BootstrapError>) -> Result<T, BootstrapError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(BootstrapError::from_panic(payload)))
}

// ─── Convenience ────────────────────────────────────────────────────

/// Run the whole sequence. `on_armed` runs right before the blocking loop
/// (install signal handlers, start producers); an error or panic from it
/// aborts with teardown.
pub fn bootstrap<C, N, F, A>(
    name: &str,
    config: ProcessRealTimeConfig,
    configurator: C,
    executor: ExecutorConfig,
    factory: F,
    on_armed: A,
) -> BootstrapReport
where
    C: SchedulingConfigurator,
    N: LifecycleNode + 'static,
    F: FnOnce() -> Result<N, CallbackError>,
    A: FnOnce(&Bootstrap<C, Armed<N>>) -> Result<(), BootstrapError>,
{
    let armed = Bootstrap::new(config, configurator)
        .prepare()
        .and_then(|b| b.create(name, factory, executor))
        .and_then(|b| b.settle_realtime())
        .and_then(|b| b.start());

    match armed {
        Ok(armed) => match guarded(|| on_armed(&armed)) {
            Ok(()) => armed.run(),
            Err(e) => armed.abort(e),
        },
        Err(report) => report,
    }
}
