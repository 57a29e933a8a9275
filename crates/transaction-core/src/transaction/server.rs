//! Server transactions (RFC 3261 §17.2, RFC 6026 §7.1)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use siplet_sip_core::{Request, Response};
use siplet_sip_transport::SipConnection;

use super::{TimerName, TransactionKey, TransactionKind, TransactionState, TuEvent, TxEnv, TxTimers};
use crate::error::{Error, Result};

/// A server INVITE or non-INVITE transaction
pub struct ServerTransaction {
    key: TransactionKey,
    kind: TransactionKind,
    state: TransactionState,
    request: Request,
    connection: Arc<dyn SipConnection>,
    reliable: bool,
    last_response: Option<Response>,
    interval: Duration,
    timed_out: bool,
    timers: TxTimers,
}

impl ServerTransaction {
    pub(crate) fn new(
        key: TransactionKey,
        request: Request,
        connection: Arc<dyn SipConnection>,
    ) -> Self {
        let (kind, state) = if request.is_invite() {
            (TransactionKind::InviteServer, TransactionState::Proceeding)
        } else {
            (TransactionKind::NonInviteServer, TransactionState::Trying)
        };
        let reliable = connection.transport().is_reliable();
        Self {
            key,
            kind,
            state,
            request,
            connection,
            reliable,
            last_response: None,
            interval: Duration::ZERO,
            timed_out: false,
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

    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// True once Timer H, Timer L or the ceiling expired
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// True once a final response went out
    pub fn has_final_response(&self) -> bool {
        self.last_response.as_ref().map_or(false, Response::is_final)
    }

    fn is_invite(&self) -> bool {
        self.kind == TransactionKind::InviteServer
    }

    /// Arm the ceiling that bounds a transaction the TU never answers
    pub(crate) fn start(&mut self, env: &mut TxEnv<'_>) {
        let ceiling = if self.is_invite() {
            env.settings.invite_ceiling
        } else {
            env.settings.timeout()
        };
        self.timers.start(env, &self.key, TimerName::Ceiling, ceiling);
        debug!(transaction = %self.key, state = %self.state, "Server transaction started");
    }

    /// Send a response through the transaction.
    ///
    /// Sending after the final response is an illegal-state error; the only
    /// exception is a 2xx re-sent by the TU while an INVITE is Accepted.
    pub(crate) fn send_response(
        &mut self,
        mut response: Response,
        env: &mut TxEnv<'_>,
    ) -> Result<Vec<TuEvent>> {
        match self.state {
            TransactionState::Accepted if response.is_success() => {}
            TransactionState::Trying | TransactionState::Proceeding => {}
            state => {
                return Err(Error::illegal_state(format!(
                    "Cannot send {} in transaction {} (state {})",
                    response.status(),
                    self.key,
                    state
                )))
            }
        }

        response.commit();
        if let Err(e) = self.connection.send_response(&response) {
            if e.is_message_too_long() {
                return Err(e.into());
            }
            warn!(transaction = %self.key, "Failed to send {}: {}", response.status(), e);
        }

        let settings = env.settings;
        let mut events = Vec::new();
        let code = response.status().as_u16();
        let from = self.state;
        self.last_response = Some(response);

        if self.is_invite() {
            match (from, code) {
                (_, 100..=199) => {}
                (TransactionState::Proceeding, 200..=299) => {
                    self.timers.stop(env, TimerName::Ceiling);
                    self.transition(TransactionState::Accepted);
                    self.interval = settings.t1;
                    if !self.reliable {
                        self.timers.start(env, &self.key, TimerName::G, settings.timer_g());
                    }
                    self.timers.start(env, &self.key, TimerName::L, settings.timer_l());
                }
                (TransactionState::Proceeding, _) => {
                    self.timers.stop(env, TimerName::Ceiling);
                    self.transition(TransactionState::Completed);
                    self.interval = settings.t1;
                    if !self.reliable {
                        self.timers.start(env, &self.key, TimerName::G, settings.timer_g());
                    }
                    self.timers.start(env, &self.key, TimerName::H, settings.timer_h());
                }
                _ => {}
            }
        } else if code < 200 {
            self.transition(TransactionState::Proceeding);
        } else {
            self.timers.stop(env, TimerName::Ceiling);
            self.transition(TransactionState::Completed);
            let timer_j = settings.timer_j(self.reliable);
            if timer_j.is_zero() {
                self.terminate(env);
                events.push(TuEvent::Terminated);
            } else {
                self.timers.start(env, &self.key, TimerName::J, timer_j);
            }
        }
        Ok(events)
    }

    /// The request arrived again: repeat the latest response
    pub(crate) fn on_retransmission(&mut self) {
        match &self.last_response {
            Some(response) => {
                debug!(
                    transaction = %self.key,
                    "Request retransmission, repeating {}",
                    response.status()
                );
                if let Err(e) = self.connection.send_response(response) {
                    debug!(transaction = %self.key, "Response retransmission failed: {}", e);
                }
            }
            None => debug!(transaction = %self.key, "Request retransmission absorbed"),
        }
    }

    /// ACK for the final response. Returns false if it was absorbed.
    pub(crate) fn on_ack(&mut self, env: &mut TxEnv<'_>) -> (bool, Vec<TuEvent>) {
        let mut events = Vec::new();
        match self.state {
            TransactionState::Completed | TransactionState::Accepted => {
                self.timers.stop_all(env);
                self.transition(TransactionState::Confirmed);
                let timer_i = env.settings.timer_i(self.reliable);
                if timer_i.is_zero() {
                    self.terminate(env);
                    events.push(TuEvent::Terminated);
                } else {
                    self.timers.start(env, &self.key, TimerName::I, timer_i);
                }
                (true, events)
            }
            _ => (false, events),
        }
    }

    pub(crate) fn on_timer(&mut self, name: TimerName, env: &mut TxEnv<'_>) -> Vec<TuEvent> {
        if !self.timers.fired(name) {
            return Vec::new();
        }
        let settings = env.settings;
        let mut events = Vec::new();
        match name {
            TimerName::G
                if matches!(self.state, TransactionState::Completed | TransactionState::Accepted) =>
            {
                if let Some(response) = &self.last_response {
                    debug!(transaction = %self.key, "Retransmitting {}", response.status());
                    if let Err(e) = self.connection.send_response(response) {
                        debug!(transaction = %self.key, "Response retransmission failed: {}", e);
                    }
                }
                self.interval = settings.backoff(self.interval);
                self.timers.start(env, &self.key, TimerName::G, self.interval);
            }
            TimerName::H | TimerName::L | TimerName::Ceiling
                if !matches!(
                    self.state,
                    TransactionState::Confirmed | TransactionState::Terminated
                ) =>
            {
                warn!(
                    transaction = %self.key,
                    timer = %name,
                    state = %self.state,
                    "Server transaction timed out"
                );
                self.timed_out = true;
                self.terminate(env);
                events.push(TuEvent::TimedOut);
                events.push(TuEvent::Terminated);
            }
            TimerName::I | TimerName::J => {
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
                "Server transaction state change"
            );
            self.state = state;
        }
    }
}

impl fmt::Debug for ServerTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTransaction")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("timed_out", &self.timed_out)
            .finish()
    }
}
