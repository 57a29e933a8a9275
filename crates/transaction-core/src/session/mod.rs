//! # Call sessions
//!
//! All state of one Call-ID (its transactions, timers and application
//! sessions) lives in a [`CallSession`]. Work for a call only ever runs
//! while the session is owned by exactly one task, which gives strict
//! per-call serialization while unrelated calls proceed in parallel.
//!
//! ```text
//!  execute(call-id, job)
//!        │
//!        ▼
//!  get-or-create session ──owned?──yes──▶ push job onto the session inbox
//!        │ no                               (the owner runs it on release)
//!        ▼
//!  acquire, run job
//!        │
//!        ▼
//!  release: drain due timers (capped) ─▶ drain inbox (capped)
//!           ─▶ offer next timer to the global scheduler
//!           ─▶ remove the session if it holds nothing ─▶ give up ownership
//! ```
//!
//! Acquisition never blocks: a contending caller enqueues its job and
//! returns. The global scheduler only knows *when* a session has a timer
//! due; the timer runs when the scheduler's task acquires that session.

pub mod application;
pub mod context;
pub(crate) mod scheduler;

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

use crate::config::TransactionConfig;
use crate::manager::{SipHandler, StatsSnapshot, TransactionStats};
use crate::timer::TimerQueue;
use crate::transaction::{Transaction, TransactionKey};

pub use application::ApplicationSession;
pub use context::SessionContext;
use scheduler::SchedulerQueue;

/// Work run under a session's scope
pub type SessionJob = Box<dyn FnOnce(&mut SessionContext<'_>) + Send + 'static>;

/// State only the owner of a session may touch
#[derive(Default)]
pub(crate) struct SessionState {
    pub transactions: HashMap<TransactionKey, Transaction>,
    pub timers: TimerQueue,
    pub applications: HashMap<String, ApplicationSession>,
    /// Execution time last offered to the global scheduler
    pub scheduled: Option<Instant>,
}

impl SessionState {
    /// Nothing left that needs the session
    fn is_idle(&mut self) -> bool {
        self.timers.purge_cancelled();
        self.transactions.is_empty() && self.timers.is_empty()
    }
}

/// All state of one Call-ID
pub struct CallSession {
    id: String,
    created: Instant,
    owned: AtomicBool,
    inbox: Mutex<VecDeque<SessionJob>>,
    state: Mutex<SessionState>,
}

impl CallSession {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created: Instant::now(),
            owned: AtomicBool::new(false),
            inbox: Mutex::new(VecDeque::new()),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// True while some task owns the session
    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    /// Jobs waiting for the current owner
    pub fn pending_jobs(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Number of live transactions. Waits for a running job to finish.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Number of pending timers. Waits for a running job to finish.
    pub fn timer_count(&self) -> usize {
        let mut state = self.state.lock();
        state.timers.purge_cancelled();
        state.timers.len()
    }

    fn try_acquire(&self) -> bool {
        self.owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// Result of [`CallSessionManager::open_scope`]
pub struct SessionScope {
    manager: CallSessionManager,
    session: Arc<CallSession>,
    acquired: bool,
}

impl SessionScope {
    /// False when another task owned the session
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn session(&self) -> &Arc<CallSession> {
        &self.session
    }

    /// Run `f` inside the scope.
    ///
    /// `None` if the scope is busy or `f` panicked. A panic is logged and the
    /// scope stays usable, so closing it still runs queued jobs and timers.
    pub fn run<R>(&mut self, f: impl FnOnce(&mut SessionContext<'_>) -> R) -> Option<R> {
        if !self.acquired {
            return None;
        }
        let mut state = self.session.state.lock();
        let mut ctx = SessionContext::new(&self.manager, &self.session, &mut state);
        match catch_unwind(AssertUnwindSafe(|| f(&mut ctx))) {
            Ok(result) => Some(result),
            Err(panic) => {
                error!(
                    call_id = %self.session.id,
                    "Panic in session scope: {}",
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    /// Release the scope, running the release protocol
    pub fn close(self) {}
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        if !self.acquired {
            return;
        }
        if std::thread::panicking() {
            self.session.owned.store(false, Ordering::Release);
            return;
        }
        self.manager.release(&self.session);
    }
}

struct Inner {
    config: TransactionConfig,
    handler: Arc<dyn SipHandler>,
    stats: TransactionStats,
    sessions: DashMap<String, Arc<CallSession>>,
    scheduler: SchedulerQueue,
    running: AtomicBool,
}

/// Table of call sessions plus the global scheduler
#[derive(Clone)]
pub struct CallSessionManager {
    inner: Arc<Inner>,
}

impl CallSessionManager {
    pub fn new(config: TransactionConfig, handler: Arc<dyn SipHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                stats: TransactionStats::new(),
                sessions: DashMap::new(),
                scheduler: SchedulerQueue::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    pub(crate) fn handler(&self) -> Arc<dyn SipHandler> {
        self.inner.handler.clone()
    }

    pub(crate) fn stats(&self) -> &TransactionStats {
        &self.inner.stats
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn get(&self, id: &str) -> Option<Arc<CallSession>> {
        self.inner.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start the global scheduler task. Must be called within a tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        self.inner.scheduler.restart();
        self.inner.running.store(true, Ordering::Release);
        let manager = self.clone();
        info!("Call session scheduler started");
        tokio::spawn(async move { manager.run_scheduler().await })
    }

    /// Stop the scheduler and cancel every pending timer. Sessions that are
    /// busy right now drop their timers at the next release.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.scheduler.stop();
        for entry in self.inner.sessions.iter() {
            if let Some(mut state) = entry.value().state.try_lock() {
                state.timers.clear();
                state.scheduled = None;
            }
        }
        info!("Call session scheduler stopped");
    }

    /// Get or create the session and try to own it
    ///
    /// Ownership is taken while the table entry is held, so a concurrent
    /// release cannot remove the session between lookup and acquisition.
    pub fn open_scope(&self, id: &str) -> SessionScope {
        let (session, acquired) = {
            let entry = self
                .inner
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CallSession::new(id)));
            let session = entry.value().clone();
            let acquired = session.try_acquire();
            (session, acquired)
        };
        if !acquired {
            trace!(call_id = id, "Session busy");
        }
        SessionScope {
            manager: self.clone(),
            session,
            acquired,
        }
    }

    /// Run `job` under the scope of session `id`.
    ///
    /// If another task owns the session the job is queued on the session
    /// and run by that owner before it releases; this call never blocks.
    pub fn execute<F>(&self, id: &str, job: F)
    where
        F: FnOnce(&mut SessionContext<'_>) + Send + 'static,
    {
        let session = {
            let entry = self
                .inner
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CallSession::new(id)));
            let session = entry.value().clone();
            let mut inbox = session.inbox.lock();
            if !session.try_acquire() {
                inbox.push_back(Box::new(job));
                trace!(call_id = id, queued = inbox.len(), "Session busy, job queued");
                return;
            }
            drop(inbox);
            session
        };

        {
            let mut state = session.state.lock();
            self.run_guarded(&session, &mut state, Box::new(job), "job");
        }
        self.release(&session);
    }

    /// Queue `job` on session `id` and make sure some task drains it.
    ///
    /// Unlike [`execute`](Self::execute) the job never runs on the calling
    /// task. When the session is free, a task on the blocking pool takes
    /// ownership and runs the release protocol, which drains the inbox.
    /// Jobs for one session run in dispatch order; jobs for different
    /// sessions run in parallel. Without a runtime the job runs inline.
    pub fn dispatch<F>(&self, id: &str, job: F)
    where
        F: FnOnce(&mut SessionContext<'_>) + Send + 'static,
    {
        let session = {
            let entry = self
                .inner
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CallSession::new(id)));
            let session = entry.value().clone();
            let mut inbox = session.inbox.lock();
            inbox.push_back(Box::new(job));
            if !session.try_acquire() {
                trace!(call_id = id, queued = inbox.len(), "Session busy, job queued");
                return;
            }
            drop(inbox);
            session
        };

        match Handle::try_current() {
            Ok(handle) => {
                let manager = self.clone();
                handle.spawn_blocking(move || manager.release(&session));
            }
            Err(_) => self.release(&session),
        }
    }

    /// Run the due timers of session `id`, called by the global scheduler
    fn run_timers(&self, id: &str) {
        let session = {
            let Some(entry) = self.inner.sessions.get(id) else {
                return;
            };
            let session = entry.value().clone();
            if !session.try_acquire() {
                drop(entry);
                trace!(call_id = id, "Session busy, timers rescheduled");
                self.inner
                    .scheduler
                    .offer(Instant::now() + self.inner.config.sessions.busy_retry, id);
                return;
            }
            session
        };
        session.state.lock().scheduled = None;
        self.release(&session);
    }

    /// Release protocol, entered while owning `session`.
    ///
    /// Ownership is given up only under the inbox lock and only with an
    /// empty inbox, so a job queued by a contending caller is never lost.
    fn release(&self, session: &Arc<CallSession>) {
        let limits = self.inner.config.sessions;
        let mut state = session.state.lock();
        loop {
            let now = Instant::now();
            for _ in 0..limits.max_timers_per_release {
                let Some(task) = state.timers.poll_expired(now) else {
                    break;
                };
                self.run_guarded(session, &mut state, task.into_action(), "timer");
            }

            let mut budget = limits.max_jobs_per_release;
            while budget > 0 {
                let job = session.inbox.lock().pop_front();
                let Some(job) = job else {
                    break;
                };
                self.run_guarded(session, &mut state, job, "job");
                budget -= 1;
            }
            if budget == 0 && session.pending_jobs() > 0 {
                if let Ok(handle) = Handle::try_current() {
                    trace!(
                        call_id = %session.id,
                        "Release budget exhausted, continuing on a new task"
                    );
                    drop(state);
                    let manager = self.clone();
                    let session = session.clone();
                    handle.spawn(async move { manager.release(&session) });
                    return;
                }
                continue;
            }

            if self.inner.scheduler.is_stopped() {
                state.timers.clear();
            }
            match state.timers.next_execution_time() {
                Some(at) if state.scheduled != Some(at) || at <= now => {
                    state.scheduled = Some(at);
                    self.inner.scheduler.offer(at, &session.id);
                }
                Some(_) => {}
                None => state.scheduled = None,
            }

            if state.is_idle() {
                let removed = self
                    .inner
                    .sessions
                    .remove_if(&session.id, |_, s| {
                        Arc::ptr_eq(s, session) && s.inbox.lock().is_empty()
                    })
                    .is_some();
                if removed {
                    debug!(call_id = %session.id, "Call session removed");
                }
            }

            let inbox = session.inbox.lock();
            if inbox.is_empty() {
                session.owned.store(false, Ordering::Release);
                return;
            }
        }
    }

    fn run_guarded(
        &self,
        session: &Arc<CallSession>,
        state: &mut SessionState,
        job: SessionJob,
        what: &str,
    ) {
        let mut ctx = SessionContext::new(self, session, state);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(&mut ctx))) {
            error!(
                call_id = %session.id,
                "Panic in session {}: {}",
                what,
                panic_message(panic.as_ref())
            );
        }
    }

    async fn run_scheduler(self) {
        let queue = &self.inner.scheduler;
        loop {
            if queue.is_stopped() {
                break;
            }
            for id in queue.poll_due(Instant::now()) {
                let manager = self.clone();
                tokio::spawn(async move { manager.run_timers(&id) });
            }
            let deadline = queue
                .next_due()
                .unwrap_or_else(|| Instant::now() + self.inner.config.sessions.idle_wait);
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = queue.wakeup().notified() => {}
                _ = queue.shutdown_signal().notified() => break,
            }
        }
        debug!("Call session scheduler loop terminated");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl fmt::Debug for CallSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSessionManager")
            .field("sessions", &self.inner.sessions.len())
            .field("scheduled", &self.inner.scheduler.len())
            .finish()
    }
}
