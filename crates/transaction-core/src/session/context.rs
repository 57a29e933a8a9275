//! The handle given to every job, timer and listener of a call session

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use siplet_sip_core::{HeaderAccess, Request, Response, StatusCode};
use siplet_sip_transport::SipConnection;

use super::{ApplicationSession, CallSession, CallSessionManager, SessionState};
use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::manager::ClientTransactionListener;
use crate::timer::TimerHandle;
use crate::transaction::{
    ClientTransaction, ServerTransaction, TimerName, Transaction, TransactionKey, TransactionKind,
    TransactionState, TuEvent, TxEnv,
};
use crate::utils::via_for;

type ClientParts = (Arc<dyn ClientTransactionListener>, Arc<dyn SipConnection>);

/// Exclusive access to one call session.
///
/// A context only exists while its session is owned by the current task,
/// so everything reached through it (transactions, timers, application
/// sessions) is free of races with other work for the same Call-ID.
pub struct SessionContext<'a> {
    manager: &'a CallSessionManager,
    session: &'a Arc<CallSession>,
    state: &'a mut SessionState,
    now: Instant,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(
        manager: &'a CallSessionManager,
        session: &'a Arc<CallSession>,
        state: &'a mut SessionState,
    ) -> Self {
        Self {
            manager,
            session,
            state,
            now: Instant::now(),
        }
    }

    /// Call-ID of the session
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Time the current job or timer started
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn config(&self) -> &TransactionConfig {
        self.manager.config()
    }

    /// The session manager, for work on other calls
    pub fn sessions(&self) -> CallSessionManager {
        self.manager.clone()
    }

    // Timers

    /// Run `action` under this session's scope after `delay`
    pub fn schedule<F>(&mut self, delay: Duration, action: F) -> TimerHandle
    where
        F: FnOnce(&mut SessionContext<'_>) + Send + 'static,
    {
        self.state.timers.schedule(self.now, delay, action)
    }

    pub fn cancel_timer(&mut self, handle: &TimerHandle) {
        self.state.timers.cancel(handle);
    }

    pub fn pending_timers(&self) -> usize {
        self.state.timers.len()
    }

    // Transactions

    pub fn transaction(&self, key: &TransactionKey) -> Option<&Transaction> {
        self.state.transactions.get(key)
    }

    pub fn transaction_count(&self) -> usize {
        self.state.transactions.len()
    }

    /// Start a client transaction for `request` on `connection`.
    ///
    /// A Via with a fresh branch is pushed when the request has none. The
    /// listener receives every response, including a locally generated 408.
    pub fn send_request(
        &mut self,
        mut request: Request,
        connection: Arc<dyn SipConnection>,
        listener: Arc<dyn ClientTransactionListener>,
    ) -> Result<TransactionKey> {
        if request.is_ack() {
            return Err(Error::illegal_state("ACK is not sent in a transaction, use send_ack"));
        }
        if request.top_via().is_none() {
            request.push_via(via_for(connection.as_ref()))?;
        }
        self.start_client(request, connection, listener)
    }

    /// Send an ACK for a 2xx outside any transaction
    pub fn send_ack(&mut self, mut ack: Request, connection: &dyn SipConnection) -> Result<()> {
        if !ack.is_ack() {
            return Err(Error::illegal_state(format!(
                "send_ack called with {}",
                ack.method()
            )));
        }
        if ack.top_via().is_none() {
            ack.push_via(via_for(connection))?;
        }
        ack.commit();
        connection.send_request(&ack)?;
        Ok(())
    }

    /// Send `response` through server transaction `key`.
    ///
    /// Server keys are only handed out by the transaction layer, so a key
    /// missing from the session belongs to a transaction that already
    /// terminated; sending through it is an illegal-state error.
    pub fn send_response(&mut self, key: &TransactionKey, response: Response) -> Result<()> {
        if !key.is_server() {
            return Err(Error::illegal_state(format!(
                "{} is not a server transaction",
                key
            )));
        }
        let events = self
            .step(key, |tx, env| match tx {
                Transaction::Server(server) => server.send_response(response, env),
                Transaction::Client(_) => Ok(Vec::new()),
            })
            .map_err(|e| terminated(key, e))??;
        self.dispatch(key, None, events);
        Ok(())
    }

    /// Cancel client INVITE transaction `key`.
    ///
    /// Before any provisional response the CANCEL is held back and sent
    /// when the first 1xx arrives. Cancelling a terminated transaction is
    /// an illegal-state error.
    pub fn cancel(&mut self, key: &TransactionKey) -> Result<()> {
        let (cancel, parts) = self
            .step(key, |tx, _| match tx {
                Transaction::Client(client) => {
                    client.cancel().map(|cancel| (cancel, client_parts(client)))
                }
                Transaction::Server(_) => Err(Error::illegal_state(
                    "Only client transactions can be cancelled",
                )),
            })
            .map_err(|e| terminated(key, e))??;
        if let Some(cancel) = cancel {
            let (listener, connection) = parts;
            self.start_client(cancel, connection, listener)?;
        }
        Ok(())
    }

    // Application sessions

    /// Create an application session owned by this call
    pub fn create_application_session(&mut self) -> &mut ApplicationSession {
        let session = ApplicationSession::new();
        let id = session.id().to_string();
        self.state.applications.entry(id).or_insert(session)
    }

    pub fn application_session(&self, id: &str) -> Option<&ApplicationSession> {
        self.state.applications.get(id)
    }

    pub fn application_session_mut(&mut self, id: &str) -> Option<&mut ApplicationSession> {
        self.state.applications.get_mut(id)
    }

    pub fn remove_application_session(&mut self, id: &str) -> Option<ApplicationSession> {
        self.state.applications.remove(id)
    }

    pub fn application_sessions(&self) -> impl Iterator<Item = &ApplicationSession> {
        self.state.applications.values()
    }

    // Inbound messages

    pub(crate) fn receive_request(&mut self, request: Request, connection: Arc<dyn SipConnection>) {
        let key = match TransactionKey::for_request(&request, true) {
            Ok(key) => key,
            Err(e) => {
                debug!(call_id = self.id(), "Dropping {}: {}", request.method(), e);
                return;
            }
        };

        if request.is_ack() {
            self.receive_ack(key, request, connection);
            return;
        }

        if self.state.transactions.contains_key(&key) {
            let _ = self.step(&key, |tx, _| {
                if let Transaction::Server(server) = tx {
                    server.on_retransmission();
                }
            });
            return;
        }

        let mut tx = ServerTransaction::new(key.clone(), request.clone(), connection);
        tx.start(&mut self.env());
        self.state.transactions.insert(key.clone(), Transaction::Server(tx));
        self.manager.stats().started(if request.is_invite() {
            TransactionKind::InviteServer
        } else {
            TransactionKind::NonInviteServer
        });

        let handler = self.manager.handler();
        if request.is_cancel() {
            let invite = key.cancelled_invite();
            let found = matches!(
                self.state.transactions.get(&invite),
                Some(Transaction::Server(_))
            );
            let status = if found {
                StatusCode::OK
            } else {
                StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST
            };
            let answer = request
                .create_response(status, None)
                .map_err(Error::from)
                .and_then(|response| self.send_response(&key, response));
            if let Err(e) = answer {
                warn!(transaction = %key, "Could not answer CANCEL: {}", e);
            }
            if found {
                handler.handle_cancel(self, &invite, request);
            }
            return;
        }

        handler.handle_request(self, &key, request);
    }

    fn receive_ack(
        &mut self,
        key: TransactionKey,
        ack: Request,
        connection: Arc<dyn SipConnection>,
    ) {
        // ACK for a non-2xx final carries the INVITE's branch
        let matched = match self.state.transactions.get(&key) {
            Some(Transaction::Server(tx)) if tx.kind() == TransactionKind::InviteServer => {
                Some((key, tx.state() == TransactionState::Accepted))
            }
            _ => None,
        };
        // ACK for a 2xx is a transaction of its own; match it by CSeq number
        let matched = matched.or_else(|| {
            let seq = ack.cseq().map(|cseq| cseq.seq);
            self.state
                .transactions
                .iter()
                .find(|(_, tx)| {
                    tx.kind() == TransactionKind::InviteServer
                        && tx.state() == TransactionState::Accepted
                        && tx.request().cseq().map(|cseq| cseq.seq) == seq
                })
                .map(|(key, _)| (key.clone(), true))
        });

        let mut pass_up = true;
        if let Some((invite, accepted)) = matched {
            if let Ok((confirmed, events)) = self.step(&invite, |tx, env| match tx {
                Transaction::Server(server) => server.on_ack(env),
                Transaction::Client(_) => (false, Vec::new()),
            }) {
                trace!(transaction = %invite, confirmed, "ACK matched");
                self.dispatch(&invite, None, events);
            }
            pass_up = accepted;
        } else {
            debug!(call_id = self.id(), "ACK matches no transaction");
        }

        if pass_up {
            self.manager.handler().handle_ack(self, ack, connection);
        }
    }

    pub(crate) fn receive_response(&mut self, response: Response) {
        let key = match TransactionKey::for_response(&response) {
            Ok(key) => key,
            Err(e) => {
                debug!(call_id = self.id(), "Dropping response: {}", e);
                return;
            }
        };
        if !matches!(self.state.transactions.get(&key), Some(Transaction::Client(_))) {
            self.manager.stats().stray_response();
            warn!(
                call_id = self.id(),
                branch = key.branch(),
                status = response.status().as_u16(),
                "Response matches no transaction"
            );
            return;
        }
        if let Ok((events, parts)) = self.step(&key, |tx, env| match tx {
            Transaction::Client(client) => {
                (client.on_response(response, env), Some(client_parts(client)))
            }
            Transaction::Server(_) => (Vec::new(), None),
        }) {
            self.dispatch(&key, parts, events);
        }
    }

    pub(crate) fn on_transaction_timer(&mut self, key: &TransactionKey, name: TimerName) {
        match self.step(key, |tx, env| {
            let parts = tx.as_client().map(client_parts);
            (tx.on_timer(name, env), parts)
        }) {
            Ok((events, parts)) => self.dispatch(key, parts, events),
            Err(_) => trace!(transaction = %key, timer = %name, "Timer for a finished transaction"),
        }
    }

    // Internals

    fn env(&mut self) -> TxEnv<'_> {
        TxEnv {
            timers: &mut self.state.timers,
            settings: &self.manager.config().timers,
            now: self.now,
        }
    }

    fn start_client(
        &mut self,
        request: Request,
        connection: Arc<dyn SipConnection>,
        listener: Arc<dyn ClientTransactionListener>,
    ) -> Result<TransactionKey> {
        let key = TransactionKey::for_request(&request, false)?;
        if self.state.transactions.contains_key(&key) {
            return Err(Error::illegal_state(format!("Transaction {} already exists", key)));
        }
        let mut tx = ClientTransaction::new(key.clone(), request, connection, listener);
        tx.start(&mut self.env())?;
        self.manager.stats().started(tx.kind());
        self.state.transactions.insert(key.clone(), Transaction::Client(tx));
        Ok(key)
    }

    /// Run one state machine step with the transaction taken out of the
    /// table, then put it back unless it terminated
    fn step<R>(
        &mut self,
        key: &TransactionKey,
        f: impl FnOnce(&mut Transaction, &mut TxEnv<'_>) -> R,
    ) -> Result<R> {
        let mut tx = self
            .state
            .transactions
            .remove(key)
            .ok_or_else(|| Error::NoSuchTransaction(key.clone()))?;
        let result = f(&mut tx, &mut self.env());
        if tx.is_terminated() {
            debug!(transaction = %key, "Transaction removed");
            self.manager.stats().terminated(tx.kind());
        } else {
            self.state.transactions.insert(key.clone(), tx);
        }
        Ok(result)
    }

    fn dispatch(&mut self, key: &TransactionKey, parts: Option<ClientParts>, events: Vec<TuEvent>) {
        for event in events {
            match event {
                TuEvent::Response(response) => {
                    if let Some((listener, _)) = &parts {
                        listener.handle_response(self, key, response);
                    }
                }
                TuEvent::StartCancel(cancel) => {
                    if let Some((listener, connection)) = &parts {
                        let started =
                            self.start_client(cancel, connection.clone(), listener.clone());
                        if let Err(e) = started {
                            warn!(transaction = %key, "Could not send CANCEL: {}", e);
                        }
                    }
                }
                TuEvent::TimedOut => {
                    self.manager.handler().transaction_timeout(self, key);
                }
                TuEvent::Terminated => {
                    if let Some((listener, _)) = &parts {
                        listener.transaction_terminated(self, key);
                    }
                }
            }
        }
    }
}

/// A step on a missing transaction means it already terminated
fn terminated(key: &TransactionKey, error: Error) -> Error {
    match error {
        Error::NoSuchTransaction(_) => {
            Error::illegal_state(format!("Transaction {} is terminated", key))
        }
        other => other,
    }
}

fn client_parts(client: &ClientTransaction) -> ClientParts {
    (client.listener(), client.connection().clone())
}
