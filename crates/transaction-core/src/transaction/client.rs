//! Client transactions (RFC 3261 §17.1, RFC 6026 §7.2)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use siplet_sip_core::{Request, Response, StatusCode};
use siplet_sip_transport::SipConnection;

use super::{TimerName, TransactionKey, TransactionKind, TransactionState, TuEvent, TxEnv, TxTimers};
use crate::error::{Error, Result};
use crate::manager::ClientTransactionListener;

/// A client INVITE or non-INVITE transaction
pub struct ClientTransaction {
    key: TransactionKey,
    kind: TransactionKind,
    state: TransactionState,
    request: Request,
    connection: Arc<dyn SipConnection>,
    listener: Arc<dyn ClientTransactionListener>,
    reliable: bool,
    interval: Duration,
    ack: Option<Request>,
    cancel_pending: bool,
    timers: TxTimers,
}

impl ClientTransaction {
    pub(crate) fn new(
        key: TransactionKey,
        request: Request,
        connection: Arc<dyn SipConnection>,
        listener: Arc<dyn ClientTransactionListener>,
    ) -> Self {
        let kind = if request.is_invite() {
            TransactionKind::InviteClient
        } else {
            TransactionKind::NonInviteClient
        };
        let initial = if request.is_invite() {
            TransactionState::Calling
        } else {
            TransactionState::Trying
        };
        let reliable = connection.transport().is_reliable();
        Self {
            key,
            kind,
            state: initial,
            request,
            connection,
            listener,
            reliable,
            interval: Duration::ZERO,
            ack: None,
            cancel_pending: false,
            timers: TxTimers::default(),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn connection(&self) -> &Arc<dyn SipConnection> {
        &self.connection
    }

    pub(crate) fn listener(&self) -> Arc<dyn ClientTransactionListener> {
        self.listener.clone()
    }

    /// The ACK generated for a non-2xx final response, if any
    pub fn ack(&self) -> Option<&Request> {
        self.ack.as_ref()
    }

    fn is_invite(&self) -> bool {
        self.kind == TransactionKind::InviteClient
    }

    /// Send the request and arm the initial timers.
    ///
    /// A request too large for the connection fails immediately and leaves
    /// the transaction terminated. Other transport failures are only logged;
    /// the retransmission and timeout timers decide the outcome.
    pub(crate) fn start(&mut self, env: &mut TxEnv<'_>) -> Result<()> {
        self.request.commit();
        if let Err(e) = self.connection.send_request(&self.request) {
            if e.is_message_too_long() {
                self.state = TransactionState::Terminated;
                return Err(e.into());
            }
            warn!(transaction = %self.key, "Failed to send {}: {}", self.request.method(), e);
        }

        let settings = env.settings;
        self.interval = settings.t1;
        if self.is_invite() {
            if !self.reliable {
                self.timers.start(env, &self.key, TimerName::A, settings.timer_a());
            }
            self.timers.start(env, &self.key, TimerName::B, settings.timer_b());
        } else {
            if !self.reliable {
                self.timers.start(env, &self.key, TimerName::E, settings.timer_e());
            }
            self.timers.start(env, &self.key, TimerName::F, settings.timer_f());
        }
        debug!(transaction = %self.key, state = %self.state, "Client transaction started");
        Ok(())
    }

    /// Request a CANCEL for this INVITE.
    ///
    /// Returns the CANCEL to send, or `None` while no provisional response
    /// has arrived yet; the CANCEL is then produced by the first 1xx.
    pub(crate) fn cancel(&mut self) -> Result<Option<Request>> {
        if !self.is_invite() {
            return Err(Error::illegal_state(format!(
                "Cannot cancel a {} transaction",
                self.request.method()
            )));
        }
        match self.state {
            TransactionState::Calling => {
                debug!(
                    transaction = %self.key,
                    "CANCEL deferred until a provisional response arrives"
                );
                self.cancel_pending = true;
                Ok(None)
            }
            TransactionState::Proceeding => Ok(Some(self.request.create_cancel()?)),
            state => Err(Error::illegal_state(format!(
                "Cannot cancel a transaction in state {}",
                state
            ))),
        }
    }

    pub(crate) fn on_response(&mut self, response: Response, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        if self.is_invite() {
            self.on_invite_response(response, env)
        } else {
            self.on_non_invite_response(response, env)
        }
    }

    fn on_invite_response(&mut self, response: Response, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        let settings = env.settings;
        let mut events = Vec::new();
        let code = response.status().as_u16();
        match (self.state, code) {
            (TransactionState::Calling | TransactionState::Proceeding, 100..=199) => {
                self.timers.stop(env, TimerName::A);
                self.timers.stop(env, TimerName::B);
                if self.state == TransactionState::Calling {
                    self.transition(TransactionState::Proceeding);
                    self.timers
                        .start(env, &self.key, TimerName::Ceiling, settings.invite_ceiling);
                }
                events.push(TuEvent::Response(response));
                if self.cancel_pending {
                    self.cancel_pending = false;
                    match self.request.create_cancel() {
                        Ok(cancel) => events.push(TuEvent::StartCancel(cancel)),
                        Err(e) => warn!(transaction = %self.key, "Could not build CANCEL: {}", e),
                    }
                }
            }
            (TransactionState::Calling | TransactionState::Proceeding, 200..=299) => {
                self.timers.stop_all(env);
                self.cancel_pending = false;
                self.transition(TransactionState::Accepted);
                self.timers.start(env, &self.key, TimerName::M, settings.timer_m());
                events.push(TuEvent::Response(response));
            }
            (TransactionState::Accepted, 200..=299) => {
                // Retransmitted 2xx; the TU re-sends its ACK
                events.push(TuEvent::Response(response));
            }
            (TransactionState::Calling | TransactionState::Proceeding, 300..=699) => {
                self.timers.stop_all(env);
                self.cancel_pending = false;
                match self.request.create_ack(&response) {
                    Ok(mut ack) => {
                        ack.commit();
                        self.send_ack(&ack);
                        self.ack = Some(ack);
                    }
                    Err(e) => warn!(transaction = %self.key, "Could not build ACK: {}", e),
                }
                self.transition(TransactionState::Completed);
                events.push(TuEvent::Response(response));
                let timer_d = settings.timer_d(self.reliable);
                if timer_d.is_zero() {
                    self.terminate(env);
                    events.push(TuEvent::Terminated);
                } else {
                    self.timers.start(env, &self.key, TimerName::D, timer_d);
                }
            }
            (TransactionState::Completed, 300..=699) => {
                if let Some(ack) = &self.ack {
                    self.send_ack(ack);
                }
            }
            (state, code) => {
                debug!(transaction = %self.key, %state, code, "Response absorbed");
            }
        }
        events
    }

    fn on_non_invite_response(&mut self, response: Response, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        let settings = env.settings;
        let mut events = Vec::new();
        match self.state {
            TransactionState::Trying | TransactionState::Proceeding
                if response.is_provisional() =>
            {
                self.transition(TransactionState::Proceeding);
                events.push(TuEvent::Response(response));
            }
            TransactionState::Trying | TransactionState::Proceeding => {
                self.timers.stop_all(env);
                self.transition(TransactionState::Completed);
                events.push(TuEvent::Response(response));
                let timer_k = settings.timer_k(self.reliable);
                if timer_k.is_zero() {
                    self.terminate(env);
                    events.push(TuEvent::Terminated);
                } else {
                    self.timers.start(env, &self.key, TimerName::K, timer_k);
                }
            }
            state => {
                debug!(
                    transaction = %self.key,
                    %state,
                    code = response.status().as_u16(),
                    "Response absorbed"
                );
            }
        }
        events
    }

    pub(crate) fn on_timer(&mut self, name: TimerName, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        let settings = env.settings;
        if !self.timers.fired(name) {
            return Vec::new();
        }
        let mut events = Vec::new();
        match name {
            TimerName::A if self.state == TransactionState::Calling => {
                self.retransmit();
                self.interval *= 2;
                self.timers.start(env, &self.key, TimerName::A, self.interval);
            }
            TimerName::E
                if matches!(self.state, TransactionState::Trying | TransactionState::Proceeding) =>
            {
                self.retransmit();
                self.interval = if self.state == TransactionState::Proceeding {
                    settings.t2
                } else {
                    settings.backoff(self.interval)
                };
                self.timers.start(env, &self.key, TimerName::E, self.interval);
            }
            TimerName::B | TimerName::F | TimerName::Ceiling
                if matches!(
                    self.state,
                    TransactionState::Calling
                        | TransactionState::Trying
                        | TransactionState::Proceeding
                ) =>
            {
                debug!(transaction = %self.key, timer = %name, "Client transaction timed out");
                match self.request.create_response(StatusCode::REQUEST_TIMEOUT, None) {
                    Ok(timeout) => events.push(TuEvent::Response(timeout)),
                    Err(e) => warn!(transaction = %self.key, "Could not build 408: {}", e),
                }
                self.terminate(env);
                events.push(TuEvent::Terminated);
            }
            TimerName::D | TimerName::K | TimerName::M => {
                self.terminate(env);
                events.push(TuEvent::Terminated);
            }
            _ => {}
        }
        events
    }

    pub(crate) fn terminate(&mut self, env: &mut TxEnv<'_>) {
        self.timers.stop_all(env);
        self.transition(TransactionState::Terminated);
    }

    fn transition(&mut self, state: TransactionState) {
        if self.state != state {
            debug!(
                transaction = %self.key,
                from = %self.state,
                to = %state,
                "Client transaction state change"
            );
            self.state = state;
        }
    }

    fn retransmit(&self) {
        if let Err(e) = self.connection.send_request(&self.request) {
            debug!(transaction = %self.key, "Retransmission failed: {}", e);
        }
    }

    fn send_ack(&self, ack: &Request) {
        if let Err(e) = self.connection.send_request(ack) {
            warn!(transaction = %self.key, "Failed to send ACK: {}", e);
        }
    }
}

impl fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}
