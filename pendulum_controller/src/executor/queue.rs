//! Bounded FIFO of submitted work items.
//!
//! The queue tracks both items waiting for dispatch and items currently being
//! executed. Their sum ("outstanding") never exceeds the capacity fixed at
//! construction. Admission control lives in the executor; this type only
//! enforces the arithmetic.

use std::collections::VecDeque;
use std::time::Duration;

use pendulum_common::consts::MAX_QUEUE_CAPACITY;
use pendulum_common::data::Message;
use pendulum_common::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use super::ComponentId;

/// What a producer does when the executor is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Fail the submission immediately with `SubmitError::QueueFull`.
    #[default]
    Reject,
    /// Park the producer until space frees up, the executor closes, or the
    /// optional timeout expires.
    Block { timeout: Option<Duration> },
}

/// Payload of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkKind {
    /// Inbound message for the component.
    Message(Message),
    /// External lifecycle transition request.
    Transition(LifecycleState),
}

/// Work addressed to one attached component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkItem {
    pub target: ComponentId,
    pub kind: WorkKind,
}

/// Named capacity presets accepted by the executor factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "usize", into = "usize")]
pub enum QueueSize {
    Q16,
    Q64,
    #[default]
    Q256,
    Q1024,
    Q4096,
}

impl QueueSize {
    #[inline]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Q16 => 16,
            Self::Q64 => 64,
            Self::Q256 => 256,
            Self::Q1024 => 1024,
            Self::Q4096 => 4096,
        }
    }
}

const_assert!(QueueSize::Q4096.capacity() <= MAX_QUEUE_CAPACITY);

impl TryFrom<usize> for QueueSize {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(Self::Q16),
            64 => Ok(Self::Q64),
            256 => Ok(Self::Q256),
            1024 => Ok(Self::Q1024),
            4096 => Ok(Self::Q4096),
            other => Err(format!(
                "unsupported queue size {other} (expected 16, 64, 256, 1024 or 4096)"
            )),
        }
    }
}

impl From<QueueSize> for usize {
    fn from(value: QueueSize) -> Self {
        value.capacity()
    }
}

/// Fixed-capacity FIFO with in-flight accounting.
#[derive(Debug)]
pub(crate) struct BoundedQueue {
    items: VecDeque<WorkItem>,
    capacity: usize,
    in_flight: usize,
    high_watermark: usize,
}

impl BoundedQueue {
    /// Pre-allocates storage for `capacity` items; the buffer never grows.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            in_flight: 0,
            high_watermark: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued plus executing items.
    #[inline]
    pub(crate) fn outstanding(&self) -> usize {
        self.items.len() + self.in_flight
    }

    #[inline]
    pub(crate) fn queued(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub(crate) fn has_space(&self) -> bool {
        self.outstanding() < self.capacity
    }

    #[inline]
    pub(crate) fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// Append an item, handing it back if the queue is at capacity.
    pub(crate) fn try_push(&mut self, item: WorkItem) -> Result<(), WorkItem> {
        if !self.has_space() {
            return Err(item);
        }
        self.items.push_back(item);
        self.high_watermark = self.high_watermark.max(self.outstanding());
        Ok(())
    }

    /// Take the oldest item and mark it in flight.
    pub(crate) fn begin_next(&mut self) -> Option<WorkItem> {
        let item = self.items.pop_front()?;
        self.in_flight += 1;
        Some(item)
    }

    /// Mark one in-flight item as finished.
    pub(crate) fn complete(&mut self) {
        debug_assert!(self.in_flight > 0, "complete() without begin_next()");
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Forget in-flight items after an aborted dispatch.
    pub(crate) fn reset_in_flight(&mut self) {
        self.in_flight = 0;
    }

    /// Drop queued items addressed to `target`, returning how many.
    pub(crate) fn purge(&mut self, target: ComponentId) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.target != target);
        before - self.items.len()
    }

    /// Drop everything that is still queued, returning how many.
    pub(crate) fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}
