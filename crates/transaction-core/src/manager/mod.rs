//! # Transaction manager
//!
//! Entry point of the transaction layer. Inbound messages from the
//! transport are routed by Call-ID into their call session, where the
//! matching transaction (or a new server transaction) processes them.
//!
//! ```text
//! transport events ──▶ TransactionManager::run
//!                            │ Call-ID
//!                            ▼
//!                 CallSessionManager::dispatch
//!                            │
//!               ┌────────────┴────────────┐
//!               ▼                         ▼
//!        receive_request           receive_response
//!   (server tx, SipHandler)   (client tx, ClientTransactionListener)
//! ```

pub mod handler;
pub mod stats;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use siplet_sip_core::{FixedBuffer, Generator, HeaderAccess, Request, SipMessage};
use siplet_sip_transport::{SipConnection, TransportEvent};

use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::session::{CallSessionManager, SessionContext, SessionJob};
use crate::transaction::TransactionKey;
use crate::utils::via_for;

pub use handler::{ClientTransactionListener, RejectingHandler, SipHandler};
pub use stats::{StatsSnapshot, TransactionStats};

/// Owns the call sessions and feeds them messages
#[derive(Clone, Debug)]
pub struct TransactionManager {
    sessions: CallSessionManager,
}

impl TransactionManager {
    pub fn new(config: TransactionConfig, handler: Arc<dyn SipHandler>) -> Self {
        Self {
            sessions: CallSessionManager::new(config, handler),
        }
    }

    pub fn sessions(&self) -> &CallSessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &TransactionConfig {
        self.sessions.config()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.sessions.stats_snapshot()
    }

    /// Start the global timer scheduler
    pub fn start(&self) -> JoinHandle<()> {
        self.sessions.start()
    }

    /// Stop the scheduler; pending timers are dropped
    pub fn stop(&self) {
        self.sessions.stop();
    }

    /// Route one inbound message to its call session.
    ///
    /// Processing happens on the calling task when the session is free.
    pub fn handle_message(&self, message: SipMessage, connection: Arc<dyn SipConnection>) {
        if let Some((call_id, job)) = route(message, connection) {
            self.sessions.execute(&call_id, job);
        }
    }

    /// Route one inbound message to its call session without running it on
    /// the calling task. Messages of different calls are processed in
    /// parallel; messages of one call keep their arrival order.
    pub fn dispatch_message(&self, message: SipMessage, connection: Arc<dyn SipConnection>) {
        if let Some((call_id, job)) = route(message, connection) {
            self.sessions.dispatch(&call_id, job);
        }
    }

    /// Start a client transaction outside any session job.
    ///
    /// The key is computed and the request generated up front, so a request
    /// the session would refuse (no Call-ID, ACK, larger than the
    /// connection's `max_message_size`) fails here. Failures inside the
    /// session are logged.
    pub fn send_request(
        &self,
        mut request: Request,
        connection: Arc<dyn SipConnection>,
        listener: Arc<dyn ClientTransactionListener>,
    ) -> Result<TransactionKey> {
        if request.is_ack() {
            return Err(Error::illegal_state("ACK is not sent in a transaction"));
        }
        let call_id = request
            .call_id()
            .map(str::to_string)
            .ok_or(Error::MissingHeader("Call-ID"))?;
        if request.top_via().is_none() {
            request.push_via(via_for(connection.as_ref()))?;
        }
        let key = TransactionKey::for_request(&request, false)?;
        let mut buffer = FixedBuffer::new(connection.max_message_size());
        Generator::new().generate_request(&request, &mut buffer)?;

        self.sessions.execute(&call_id, move |ctx| {
            if let Err(e) = ctx.send_request(request, connection, listener) {
                warn!(call_id = ctx.id(), "Could not start client transaction: {}", e);
            }
        });
        Ok(key)
    }

    /// Consume transport events until the channel closes
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::MessageReceived { message, connection } => {
                    self.dispatch_message(message, connection);
                }
                TransportEvent::Error { error } => {
                    warn!("Transport error: {}", error);
                }
                TransportEvent::Closed {
                    transport,
                    local_addr,
                } => {
                    info!(%transport, %local_addr, "Transport closed");
                }
            }
        }
        debug!("Transport event channel closed");
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(&self, events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(events))
    }
}

/// Call-ID and session job for an inbound message
fn route(message: SipMessage, connection: Arc<dyn SipConnection>) -> Option<(String, SessionJob)> {
    let Some(call_id) = message.call_id().map(str::to_string) else {
        debug!(remote = %connection.remote_addr(), "Dropping message without Call-ID");
        return None;
    };
    let job: SessionJob = match message {
        SipMessage::Request(request) => {
            Box::new(move |ctx: &mut SessionContext<'_>| ctx.receive_request(request, connection))
        }
        SipMessage::Response(response) => {
            Box::new(move |ctx: &mut SessionContext<'_>| ctx.receive_response(response))
        }
    };
    Some((call_id, job))
}
