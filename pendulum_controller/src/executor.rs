//! Bounded dispatch loop for lifecycle components.
//!
//! ## Model
//! Components are attached as `Arc<Mutex<dyn Schedulable>>`. The executor
//! services two kinds of ready work:
//! - **Timers**: each component may report a period (typically only while
//!   `Active`). Timers are level-triggered readiness, not queued items.
//! - **Submitted work**: messages and lifecycle transition requests pushed by
//!   producers through a [`Submitter`].
//!
//! ## Capacity
//! At most `capacity` submitted items are outstanding (queued or executing)
//! at any time, across all components. Beyond that the configured
//! [`BackpressurePolicy`] applies: `Reject` fails the submission with
//! `SubmitError::QueueFull`, `Block` parks the producer until space frees up.
//! A blocking producer running on the dispatch thread itself is always
//! rejected instead, since it could never be woken.
//!
//! ## Fairness
//! Submitted work is serviced FIFO across all components. Due timers are
//! serviced in rotating round-robin order with one firing per component per
//! pass, so a component with a short period cannot starve the others.
//!
//! ## Threading
//! `run()` dispatches on the calling thread and parks it on a condition
//! variable between deadlines. `stop()` may be called from any thread and
//! takes effect after the callback currently executing, if any.

mod queue;

pub use queue::{BackpressurePolicy, QueueSize, WorkItem, WorkKind};

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pendulum_common::consts::MAX_QUEUE_CAPACITY;
use pendulum_common::data::Message;
use pendulum_common::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use queue::BoundedQueue;

// ─── Public Types ───────────────────────────────────────────────────

/// Handle identifying an attached component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) usize);

/// Executor flavour selected by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorVariant {
    /// Attachment set is frozen while `run()` is active.
    #[default]
    Static,
    /// Components may be attached and detached while running.
    Dynamic,
}

/// Executor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Created, `run()` not called yet.
    Idle,
    /// Inside `run()`.
    Running,
    /// `run()` returned; may be run again or destroyed.
    Stopped,
    /// `destroy_all()` completed; every further operation fails.
    Destroyed,
}

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub capacity: usize,
    pub variant: ExecutorVariant,
    pub backpressure: BackpressurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            capacity: QueueSize::default().capacity(),
            variant: ExecutorVariant::default(),
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Timing of a single timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    /// When the timer was due.
    pub scheduled: Instant,
    /// When the callback was invoked.
    pub fired: Instant,
    /// Configured period.
    pub period: Duration,
    /// Whole periods skipped because the loop fell behind.
    pub missed: u64,
}

impl TimerTick {
    /// Wake-up latency (fired − scheduled).
    #[inline]
    pub fn latency(&self) -> Duration {
        self.fired.saturating_duration_since(self.scheduled)
    }
}

/// Unrecoverable error raised by a component callback. Ends `run()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{component}: {reason}")]
pub struct ExecutorFault {
    pub component: String,
    pub reason: String,
}

impl ExecutorFault {
    pub fn new(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Executor-side endpoint of a component.
pub trait Schedulable: Send {
    /// Current timer period; `None` disarms the timer.
    fn timer_period(&self) -> Option<Duration> {
        None
    }

    /// Periodic work.
    fn on_timer(&mut self, _tick: &TimerTick) -> Result<(), ExecutorFault> {
        Ok(())
    }

    /// Inbound message.
    fn on_message(&mut self, msg: Message) -> Result<(), ExecutorFault>;

    /// External lifecycle request, serialized with all other dispatch.
    fn on_transition_request(&mut self, _target: LifecycleState) -> Result<(), ExecutorFault> {
        Ok(())
    }
}

/// Component shared between the executor and its owner.
pub type SharedComponent = Arc<Mutex<dyn Schedulable>>;

/// Errors returned by executor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("capacity must be within 1..={max}, got {capacity}")]
    InvalidCapacity { capacity: usize, max: usize },

    #[error("executor has been destroyed")]
    Destroyed,

    #[error("executor is already running")]
    AlreadyRunning,

    #[error("executor is still running")]
    StillRunning,

    #[error("static executor cannot change '{0}' while running")]
    AttachWhileRunning(String),

    #[error("component '{0}' is already attached")]
    DuplicateComponent(String),

    #[error("unknown component {0:?}")]
    UnknownComponent(ComponentId),

    #[error("fault in {0}")]
    Fault(#[from] ExecutorFault),
}

/// Errors returned to producers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    /// Rejected at capacity; the item is handed back to the producer.
    #[error("queue full ({capacity} outstanding items)")]
    QueueFull { capacity: usize, item: WorkItem },

    #[error("timed out waiting for queue space")]
    Timeout,

    #[error("executor closed")]
    Closed,

    #[error("unknown component {0:?}")]
    UnknownComponent(ComponentId),
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub messages_dispatched: u64,
    pub transitions_dispatched: u64,
    pub timers_fired: u64,
    pub missed_periods: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub high_watermark: usize,
}

// ─── Shared State ───────────────────────────────────────────────────

struct Attachment {
    id: ComponentId,
    name: String,
    component: SharedComponent,
}

struct Inner {
    state: ExecutorState,
    queue: BoundedQueue,
    attached: Vec<Attachment>,
    generation: u64,
    next_id: usize,
    stop_requested: bool,
    dispatch_thread: Option<ThreadId>,
    stats: ExecutorStats,
}

impl Inner {
    fn is_attached(&self, id: ComponentId) -> bool {
        self.attached.iter().any(|a| a.id == id)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    work_ready: Condvar,
    space_ready: Condvar,
    config: ExecutorConfig,
}

impl Shared {
    fn request_stop(&self) {
        self.inner.lock().stop_requested = true;
        self.work_ready.notify_all();
    }
}

// ─── Executor ───────────────────────────────────────────────────────

/// Fixed-capacity executor. See the module docs for the dispatch policy.
pub struct BoundedExecutor {
    shared: Arc<Shared>,
}

/// Executor factory: preset capacity plus variant.
pub fn create_executor(
    size: QueueSize,
    variant: ExecutorVariant,
    backpressure: BackpressurePolicy,
) -> BoundedExecutor {
    let config = ExecutorConfig {
        capacity: size.capacity(),
        variant,
        backpressure,
    };
    BoundedExecutor::from_valid_config(config)
}

impl BoundedExecutor {
    /// Create an executor with an arbitrary capacity.
    ///
    /// # Errors
    /// `InvalidCapacity` if the capacity is 0 or above `MAX_QUEUE_CAPACITY`.
    pub fn create(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        if config.capacity == 0 || config.capacity > MAX_QUEUE_CAPACITY {
            return Err(ExecutorError::InvalidCapacity {
                capacity: config.capacity,
                max: MAX_QUEUE_CAPACITY,
            });
        }
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: ExecutorConfig) -> Self {
        debug!(
            capacity = config.capacity,
            variant = ?config.variant,
            backpressure = ?config.backpressure,
            "executor created"
        );
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ExecutorState::Idle,
                    queue: BoundedQueue::new(config.capacity),
                    attached: Vec::new(),
                    generation: 0,
                    next_id: 0,
                    stop_requested: false,
                    dispatch_thread: None,
                    stats: ExecutorStats::default(),
                }),
                work_ready: Condvar::new(),
                space_ready: Condvar::new(),
                config,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    #[inline]
    pub fn variant(&self) -> ExecutorVariant {
        self.shared.config.variant
    }

    pub fn state(&self) -> ExecutorState {
        self.shared.inner.lock().state
    }

    /// Submitted items currently queued or executing.
    pub fn outstanding(&self) -> usize {
        self.shared.inner.lock().queue.outstanding()
    }

    pub fn attached_count(&self) -> usize {
        self.shared.inner.lock().attached.len()
    }

    pub fn stats(&self) -> ExecutorStats {
        let inner = self.shared.inner.lock();
        ExecutorStats {
            high_watermark: inner.queue.high_watermark(),
            ..inner.stats
        }
    }

    /// Attach a component under a unique name.
    pub fn attach<S: Schedulable + 'static>(
        &self,
        name: impl Into<String>,
        component: Arc<Mutex<S>>,
    ) -> Result<ComponentId, ExecutorError> {
        let name = name.into();
        let mut inner = self.shared.inner.lock();
        match inner.state {
            ExecutorState::Destroyed => return Err(ExecutorError::Destroyed),
            ExecutorState::Running if self.variant() == ExecutorVariant::Static => {
                return Err(ExecutorError::AttachWhileRunning(name));
            }
            _ => {}
        }
        if inner.attached.iter().any(|a| a.name == name) {
            return Err(ExecutorError::DuplicateComponent(name));
        }

        let id = ComponentId(inner.next_id);
        inner.next_id += 1;
        let component: SharedComponent = component;
        debug!(component = %name, ?id, "attached");
        inner.attached.push(Attachment {
            id,
            name,
            component,
        });
        inner.generation += 1;
        drop(inner);
        self.shared.work_ready.notify_all();
        Ok(id)
    }

    /// Detach a component, discarding its queued work (the count is logged
    /// and added to `ExecutorStats::dropped`).
    pub fn detach(&self, id: ComponentId) -> Result<(), ExecutorError> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            ExecutorState::Destroyed => return Err(ExecutorError::Destroyed),
            ExecutorState::Running if self.variant() == ExecutorVariant::Static => {
                return Err(ExecutorError::AttachWhileRunning(format!("{id:?}")));
            }
            _ => {}
        }
        let pos = inner
            .attached
            .iter()
            .position(|a| a.id == id)
            .ok_or(ExecutorError::UnknownComponent(id))?;
        let attachment = inner.attached.remove(pos);
        let dropped = inner.queue.purge(id);
        inner.stats.dropped += dropped as u64;
        inner.generation += 1;
        drop(inner);

        if dropped > 0 {
            warn!(component = %attachment.name, dropped, "discarded queued work on detach");
        }
        debug!(component = %attachment.name, "detached");
        self.shared.work_ready.notify_all();
        self.shared.space_ready.notify_all();
        Ok(())
    }

    /// Producer handle.
    pub fn submitter(&self) -> Submitter {
        Submitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Thread-safe handle that ends `run()`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Request `run()` to return. A stop requested before `run()` makes the
    /// next `run()` return immediately.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Dispatch until `stop()` or a component fault.
    ///
    /// # Errors
    /// - `Destroyed` / `AlreadyRunning` if the executor cannot run.
    /// - `Fault` if a callback reported an unrecoverable error.
    pub fn run(&self) -> Result<(), ExecutorError> {
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ExecutorState::Destroyed => return Err(ExecutorError::Destroyed),
                ExecutorState::Running => return Err(ExecutorError::AlreadyRunning),
                ExecutorState::Idle | ExecutorState::Stopped => {}
            }
            inner.state = ExecutorState::Running;
            inner.dispatch_thread = Some(thread::current().id());
            info!(
                components = inner.attached.len(),
                capacity = inner.queue.capacity(),
                "executor running"
            );
        }

        let _guard = RunGuard {
            shared: &self.shared,
        };
        let result = Dispatcher::new(&self.shared).run();
        match &result {
            Ok(()) => info!("executor stopped"),
            Err(_) => debug!("executor stopped on fault"),
        }
        result
    }

    /// Detach every component and close the executor.
    ///
    /// Must be called after `run()` returned. Queued work is discarded and
    /// counted. Returns the number of detached components.
    pub fn destroy_all(&self) -> Result<usize, ExecutorError> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            ExecutorState::Running => return Err(ExecutorError::StillRunning),
            ExecutorState::Destroyed => return Err(ExecutorError::Destroyed),
            ExecutorState::Idle | ExecutorState::Stopped => {}
        }

        let dropped = inner.queue.clear();
        inner.stats.dropped += dropped as u64;
        let detached = inner.attached.len();
        for attachment in inner.attached.drain(..) {
            debug!(component = %attachment.name, "detached");
        }
        inner.state = ExecutorState::Destroyed;
        inner.generation += 1;
        drop(inner);

        if dropped > 0 {
            warn!(dropped, "discarded queued work on destroy");
        }
        info!(detached, "executor destroyed");
        self.shared.work_ready.notify_all();
        self.shared.space_ready.notify_all();
        Ok(detached)
    }
}

/// Restores a consistent state when `run()` exits, including by unwinding.
struct RunGuard<'a> {
    shared: &'a Shared,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.state = ExecutorState::Stopped;
        inner.stop_requested = false;
        inner.dispatch_thread = None;
        inner.queue.reset_in_flight();
        drop(inner);
        self.shared.space_ready.notify_all();
    }
}

// ─── Handles ────────────────────────────────────────────────────────

/// Cloneable stop trigger, safe to move into a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.request_stop();
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct Submitter {
    shared: Arc<Shared>,
}

impl Submitter {
    /// Queue a message for `target`.
    pub fn submit(&self, target: ComponentId, msg: Message) -> Result<(), SubmitError> {
        self.push(WorkItem {
            target,
            kind: WorkKind::Message(msg),
        })
    }

    /// Queue a lifecycle transition request for `target`.
    pub fn request_transition(
        &self,
        target: ComponentId,
        state: LifecycleState,
    ) -> Result<(), SubmitError> {
        self.push(WorkItem {
            target,
            kind: WorkKind::Transition(state),
        })
    }

    fn push(&self, item: WorkItem) -> Result<(), SubmitError> {
        let shared = &self.shared;
        let capacity = shared.config.capacity;
        let deadline = match shared.config.backpressure {
            BackpressurePolicy::Block {
                timeout: Some(timeout),
            } => Some(Instant::now() + timeout),
            _ => None,
        };

        let mut inner = shared.inner.lock();
        loop {
            if inner.state == ExecutorState::Destroyed {
                return Err(SubmitError::Closed);
            }
            if !inner.is_attached(item.target) {
                return Err(SubmitError::UnknownComponent(item.target));
            }
            if inner.queue.try_push(item).is_ok() {
                drop(inner);
                shared.work_ready.notify_one();
                return Ok(());
            }

            let on_dispatch_thread = inner.dispatch_thread == Some(thread::current().id());
            match shared.config.backpressure {
                BackpressurePolicy::Block { .. } if !on_dispatch_thread => match deadline {
                    Some(deadline) => {
                        if shared.space_ready.wait_until(&mut inner, deadline).timed_out()
                            && !inner.queue.has_space()
                        {
                            inner.stats.rejected += 1;
                            return Err(SubmitError::Timeout);
                        }
                    }
                    None => shared.space_ready.wait(&mut inner),
                },
                _ => {
                    inner.stats.rejected += 1;
                    return Err(SubmitError::QueueFull { capacity, item });
                }
            }
        }
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────

struct TimerSlot {
    id: ComponentId,
    component: SharedComponent,
    period: Option<Duration>,
    next_fire: Option<Instant>,
}

/// Dispatch-thread-local view of the attachments.
struct Dispatcher<'a> {
    shared: &'a Shared,
    slots: Vec<TimerSlot>,
    generation: Option<u64>,
    cursor: usize,
}

impl<'a> Dispatcher<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            slots: Vec::new(),
            generation: None,
            cursor: 0,
        }
    }

    fn run(mut self) -> Result<(), ExecutorError> {
        loop {
            self.sync_attachments();
            self.refresh_timers(Instant::now());
            if self.stop_requested() {
                return Ok(());
            }
            self.fire_due_timers()?;
            // Dispatched work may have changed timer periods; re-check
            // them before parking.
            if self.drain_submitted()? > 0 {
                continue;
            }
            if !self.park() {
                return Ok(());
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.inner.lock().stop_requested
    }

    /// Rebuild the slot list when the attachment set changed. Allocates only
    /// on change.
    fn sync_attachments(&mut self) {
        let inner = self.shared.inner.lock();
        if self.generation == Some(inner.generation) {
            return;
        }
        let mut slots = Vec::with_capacity(inner.attached.len());
        for a in &inner.attached {
            let previous = self.slots.iter().find(|s| s.id == a.id);
            slots.push(TimerSlot {
                id: a.id,
                component: Arc::clone(&a.component),
                period: previous.and_then(|s| s.period),
                next_fire: previous.and_then(|s| s.next_fire),
            });
        }
        self.generation = Some(inner.generation);
        drop(inner);

        self.slots = slots;
        if self.cursor >= self.slots.len() {
            self.cursor = 0;
        }
    }

    /// Arm, re-arm or disarm timers according to each component's period.
    fn refresh_timers(&mut self, now: Instant) {
        for slot in &mut self.slots {
            let period = slot.component.lock().timer_period();
            if period != slot.period {
                slot.period = period;
                slot.next_fire = period.map(|p| now + p);
            }
        }
    }

    fn fire_due_timers(&mut self) -> Result<(), ExecutorError> {
        let n = self.slots.len();
        if n == 0 {
            return Ok(());
        }
        let start = self.cursor;
        self.cursor = (start + 1) % n;

        for k in 0..n {
            let slot = &mut self.slots[(start + k) % n];
            let (Some(period), Some(due)) = (slot.period, slot.next_fire) else {
                continue;
            };
            let now = Instant::now();
            if now < due {
                continue;
            }

            let period_ns = period.as_nanos().max(1);
            let missed = (now.duration_since(due).as_nanos() / period_ns) as u64;
            let advance_ns = period_ns.saturating_mul(u128::from(missed) + 1);
            slot.next_fire = Some(due + Duration::from_nanos(advance_ns.min(u64::MAX as u128) as u64));

            let tick = TimerTick {
                scheduled: due,
                fired: now,
                period,
                missed,
            };
            let result = slot.component.lock().on_timer(&tick);

            let stop = {
                let mut inner = self.shared.inner.lock();
                inner.stats.timers_fired += 1;
                inner.stats.missed_periods += missed;
                inner.stop_requested
            };
            result?;
            if stop {
                break;
            }
        }
        Ok(())
    }

    /// Dispatch the items queued at the start of the pass, FIFO.
    /// Returns how many were dispatched.
    fn drain_submitted(&mut self) -> Result<usize, ExecutorError> {
        let budget = self.shared.inner.lock().queue.queued();
        let mut dispatched = 0;
        for _ in 0..budget {
            let (item, component) = {
                let mut inner = self.shared.inner.lock();
                if inner.stop_requested {
                    return Ok(dispatched);
                }
                let Some(item) = inner.queue.begin_next() else {
                    break;
                };
                let component = inner
                    .attached
                    .iter()
                    .find(|a| a.id == item.target)
                    .map(|a| Arc::clone(&a.component));
                (item, component)
            };

            let result = match component {
                Some(component) => {
                    let mut component = component.lock();
                    match item.kind {
                        WorkKind::Message(msg) => component.on_message(msg),
                        WorkKind::Transition(target) => component.on_transition_request(target),
                    }
                }
                None => {
                    warn!(component = ?item.target, "work for detached component discarded");
                    Ok(())
                }
            };

            {
                let mut inner = self.shared.inner.lock();
                inner.queue.complete();
                match item.kind {
                    WorkKind::Message(_) => inner.stats.messages_dispatched += 1,
                    WorkKind::Transition(_) => inner.stats.transitions_dispatched += 1,
                }
            }
            self.shared.space_ready.notify_one();
            dispatched += 1;
            result?;
        }
        Ok(dispatched)
    }

    /// Park until the next timer deadline, new work, or stop.
    /// Returns false when a stop was requested.
    fn park(&self) -> bool {
        let next_deadline = self.slots.iter().filter_map(|s| s.next_fire).min();
        let mut inner = self.shared.inner.lock();
        if inner.stop_requested {
            return false;
        }
        if inner.queue.queued() > 0 || self.generation != Some(inner.generation) {
            return true;
        }
        match next_deadline {
            Some(deadline) => {
                if deadline > Instant::now() {
                    self.shared.work_ready.wait_until(&mut inner, deadline);
                }
            }
            None => self.shared.work_ready.wait(&mut inner),
        }
        !inner.stop_requested
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
