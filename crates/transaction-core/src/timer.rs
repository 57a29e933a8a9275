//! Per-session timer queue
//!
//! Every call session owns one [`TimerQueue`], a min-heap ordered by
//! absolute execution time. Timers only ever run under the session's
//! scope, so a timer never races a message or another timer of the same
//! call. Cancellation is cooperative: the flag is checked when the task is
//! popped, and a task already running is not interrupted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::session::SessionContext;

/// Work run when a timer fires
pub type TimerAction = Box<dyn FnOnce(&mut SessionContext<'_>) + Send + 'static>;

/// Handle to a scheduled timer
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn execution_time(&self) -> Instant {
        self.at
    }

    /// Flag the timer as cancelled. It is dropped from the queue the next
    /// time the queue is inspected.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A scheduled unit of work
pub struct TimerTask {
    id: u64,
    at: Instant,
    cancelled: Arc<AtomicBool>,
    action: TimerAction,
}

impl TimerTask {
    pub fn execution_time(&self) -> Instant {
        self.at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn into_action(self) -> TimerAction {
        self.action
    }
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTask")
            .field("id", &self.id)
            .field("at", &self.at)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// BinaryHeap is a max-heap: reverse so the earliest task is on top, ties in
// scheduling order.
impl Ord for TimerTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerTask {}

/// Min-heap of timer tasks keyed by execution time
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerTask>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run at `at`
    pub fn schedule_at<F>(&mut self, at: Instant, action: F) -> TimerHandle
    where
        F: FnOnce(&mut SessionContext<'_>) + Send + 'static,
    {
        self.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = TimerHandle {
            id: self.next_id,
            at,
            cancelled: cancelled.clone(),
        };
        self.heap.push(TimerTask {
            id: self.next_id,
            at,
            cancelled,
            action: Box::new(action),
        });
        handle
    }

    pub fn schedule<F>(&mut self, now: Instant, delay: Duration, action: F) -> TimerHandle
    where
        F: FnOnce(&mut SessionContext<'_>) + Send + 'static,
    {
        self.schedule_at(now + delay, action)
    }

    /// Cancel and remove the timer
    pub fn cancel(&mut self, handle: &TimerHandle) {
        handle.cancel();
        self.heap.retain(|task| task.id != handle.id);
    }

    /// Remove every task whose handle was cancelled
    pub fn purge_cancelled(&mut self) {
        self.heap.retain(|task| !task.is_cancelled());
    }

    /// Execution time of the earliest live task
    pub fn next_execution_time(&mut self) -> Option<Instant> {
        self.drop_cancelled_head();
        self.heap.peek().map(|task| task.at)
    }

    /// Pop the earliest live task if it is due at `now`
    pub fn poll_expired(&mut self, now: Instant) -> Option<TimerTask> {
        self.drop_cancelled_head();
        if self.heap.peek().map_or(false, |task| task.at <= now) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Cancel every task
    pub fn clear(&mut self) {
        for task in self.heap.drain() {
            task.cancelled.store(true, AtomicOrdering::Release);
        }
    }

    fn drop_cancelled_head(&mut self) {
        while self.heap.peek().map_or(false, TimerTask::is_cancelled) {
            self.heap.pop();
        }
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue").field("len", &self.heap.len()).finish()
    }
}
