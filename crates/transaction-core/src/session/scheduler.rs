//! Global scheduler queue
//!
//! Holds at most a few entries per call session: the execution time of the
//! session's next timer. A single task sleeps until the earliest entry and
//! then asks the session manager to run that session's timers; the timers
//! themselves never leave their session.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    at: Instant,
    seq: u64,
    session_id: String,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
    wakeup: Notify,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl SchedulerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake `session_id` at `at`. Ignored once stopped.
    pub fn offer(&self, at: Instant, session_id: &str) {
        if self.is_stopped() {
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let earliest = {
            let mut heap = self.heap.lock();
            heap.push(Reverse(Entry {
                at,
                seq,
                session_id: session_id.to_string(),
            }));
            heap.peek().map_or(false, |Reverse(e)| e.seq == seq)
        };
        if earliest {
            self.wakeup.notify_one();
        }
    }

    /// Remove and return the ids of every entry due at `now`
    pub fn poll_due(&self, now: Instant) -> Vec<String> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().map_or(false, |Reverse(e)| e.at <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry.session_id);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(e)| e.at)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn clear(&self) {
        self.heap.lock().clear();
    }

    pub fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    pub fn shutdown_signal(&self) -> &Notify {
        &self.shutdown
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn restart(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.clear();
        self.shutdown.notify_one();
    }
}
