//! # SIP Transactions
//!
//! RFC 3261 §17 state machines for the four transaction kinds:
//!
//! ```text
//!   Client INVITE      Calling ──1xx──▶ Proceeding ──2xx──▶ Accepted ──M──▶ Terminated
//!                         │                 │
//!                         └──────300-699────┴──▶ Completed ──D──▶ Terminated
//!
//!   Client non-INVITE  Trying ──1xx──▶ Proceeding ──final──▶ Completed ──K──▶ Terminated
//!
//!   Server INVITE      Proceeding ──2xx──▶ Accepted ──ACK──▶ Confirmed ──I──▶ Terminated
//!                         │
//!                         └──300-699──▶ Completed ──ACK──▶ Confirmed ──I──▶ Terminated
//!
//!   Server non-INVITE  Trying ──1xx──▶ Proceeding ──final──▶ Completed ──J──▶ Terminated
//! ```
//!
//! Transactions never own a timer thread. Every timer is scheduled on the
//! queue of the call session that owns the transaction, so a timer and an
//! inbound message for the same call never run at the same time. A state
//! machine step returns the events the transaction user must see; the
//! session context delivers them once the transaction is back in its table.

pub mod client;
pub mod server;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use siplet_sip_core::{HeaderAccess, Request, Response};

use crate::config::TimerSettings;
use crate::error::{Error, Result};
use crate::timer::{TimerHandle, TimerQueue};
use crate::utils::BRANCH_MAGIC_COOKIE;

pub use client::ClientTransaction;
pub use server::ServerTransaction;

/// Identifies a transaction within its call session.
///
/// Matching follows RFC 3261 §17.1.3 and §17.2.3: the top Via branch, the
/// side of the transaction, and whether the request is a CANCEL (a CANCEL
/// shares its branch with the INVITE it cancels). An ACK for a non-2xx
/// final response carries the INVITE's branch and therefore maps onto the
/// INVITE server transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    branch: String,
    server: bool,
    cancel: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, server: bool, cancel: bool) -> Self {
        Self {
            branch: branch.into(),
            server,
            cancel,
        }
    }

    /// Key of the transaction a request belongs to
    pub fn for_request(request: &Request, server: bool) -> Result<Self> {
        let branch = request
            .top_via()
            .ok_or(Error::MissingHeader("Via"))?
            .branch()
            .ok_or_else(|| Error::InvalidBranch("Top Via has no branch".to_string()))?;
        if !branch.starts_with(BRANCH_MAGIC_COOKIE) {
            return Err(Error::InvalidBranch(branch.to_string()));
        }
        Ok(Self::new(branch, server, request.is_cancel()))
    }

    /// Key of the client transaction a response belongs to
    pub fn for_response(response: &Response) -> Result<Self> {
        let branch = response
            .top_via()
            .ok_or(Error::MissingHeader("Via"))?
            .branch()
            .ok_or_else(|| Error::InvalidBranch("Top Via has no branch".to_string()))?;
        let cseq = response.cseq().ok_or(Error::MissingHeader("CSeq"))?;
        Ok(Self::new(branch, false, cseq.method.is_cancel()))
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    pub fn is_cancel(&self) -> bool {
        self.cancel
    }

    /// Key of the server INVITE transaction a CANCEL with this key targets
    pub fn cancelled_invite(&self) -> Self {
        Self::new(self.branch.clone(), self.server, false)
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.branch,
            if self.server { "server" } else { "client" },
            if self.cancel { ":cancel" } else { "" }
        )
    }
}

/// The four transaction kinds of RFC 3261 §17
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, TransactionKind::InviteServer | TransactionKind::NonInviteServer)
    }
}

/// Transaction states, including the RFC 6026 Accepted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Accepted,
    Confirmed,
    Terminated,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transaction timers of RFC 3261 and RFC 6026, plus the absolute ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    Ceiling,
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the transaction user has to be told after a state machine step
#[derive(Debug)]
pub(crate) enum TuEvent {
    /// Response for a client transaction's listener
    Response(Response),
    /// A deferred CANCEL became sendable
    StartCancel(Request),
    /// A server transaction gave up waiting (Timer H, L or the ceiling)
    TimedOut,
    Terminated,
}

/// Everything a state machine step may touch besides the transaction itself
pub(crate) struct TxEnv<'a> {
    pub timers: &'a mut TimerQueue,
    pub settings: &'a TimerSettings,
    pub now: Instant,
}

/// Timer handles of one transaction
#[derive(Debug, Default)]
pub(crate) struct TxTimers {
    handles: HashMap<TimerName, TimerHandle>,
}

impl TxTimers {
    /// (Re)start `name`. The timer calls back into the owning session with
    /// the transaction key.
    pub fn start(
        &mut self,
        env: &mut TxEnv<'_>,
        key: &TransactionKey,
        name: TimerName,
        delay: Duration,
    ) {
        self.stop(env, name);
        let timer_key = key.clone();
        let handle = env.timers.schedule(
            env.now,
            delay,
            move |ctx| ctx.on_transaction_timer(&timer_key, name),
        );
        trace!(transaction = %key, timer = %name, ?delay, "Timer started");
        self.handles.insert(name, handle);
    }

    pub fn stop(&mut self, env: &mut TxEnv<'_>, name: TimerName) {
        if let Some(handle) = self.handles.remove(&name) {
            env.timers.cancel(&handle);
        }
    }

    pub fn stop_all(&mut self, env: &mut TxEnv<'_>) {
        for (_, handle) in self.handles.drain() {
            env.timers.cancel(&handle);
        }
    }

    /// Forget a timer that just fired. False if it was stopped meanwhile.
    pub fn fired(&mut self, name: TimerName) -> bool {
        self.handles.remove(&name).is_some()
    }

    pub fn is_running(&self, name: TimerName) -> bool {
        self.handles.contains_key(&name)
    }
}

/// A client or server transaction
#[derive(Debug)]
pub enum Transaction {
    Client(ClientTransaction),
    Server(ServerTransaction),
}

impl Transaction {
    pub fn key(&self) -> &TransactionKey {
        match self {
            Transaction::Client(tx) => tx.key(),
            Transaction::Server(tx) => tx.key(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Client(tx) => tx.kind(),
            Transaction::Server(tx) => tx.kind(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            Transaction::Client(tx) => tx.state(),
            Transaction::Server(tx) => tx.state(),
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            Transaction::Client(tx) => tx.request(),
            Transaction::Server(tx) => tx.request(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == TransactionState::Terminated
    }

    pub fn as_client(&self) -> Option<&ClientTransaction> {
        match self {
            Transaction::Client(tx) => Some(tx),
            _ => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerTransaction> {
        match self {
            Transaction::Server(tx) => Some(tx),
            _ => None,
        }
    }

    pub(crate) fn on_timer(&mut self, name: TimerName, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        match self {
            Transaction::Client(tx) => tx.on_timer(name, env),
            Transaction::Server(tx) => tx.on_timer(name, env),
        }
    }

    pub(crate) fn terminate(&mut self, env: &mut TxEnv<'_>) {
        match self {
            Transaction::Client(tx) => tx.terminate(env),
            Transaction::Server(tx) => tx.terminate(env),
        }
    }
}
