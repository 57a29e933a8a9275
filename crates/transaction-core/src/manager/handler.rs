//! Upward interfaces of the transaction layer
//!
//! Every callback runs inside the call session's scope and receives its
//! [`SessionContext`], so a handler may answer, start new transactions or
//! schedule timers for the same call without any locking of its own.

use std::sync::Arc;

use tracing::{debug, warn};

use siplet_sip_core::{HeaderAccess, Request, Response, StatusCode};
use siplet_sip_transport::SipConnection;

use crate::error::Error;
use crate::session::SessionContext;
use crate::transaction::TransactionKey;
use crate::utils::generate_tag;

/// Receives requests that are not absorbed by the transaction layer
pub trait SipHandler: Send + Sync {
    /// A new request created server transaction `key`. Answer it with
    /// [`SessionContext::send_response`].
    fn handle_request(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey, request: Request);

    /// An ACK for a 2xx, or an ACK that matches no transaction
    fn handle_ack(
        &self,
        ctx: &mut SessionContext<'_>,
        ack: Request,
        connection: Arc<dyn SipConnection>,
    ) {
        let _ = (ctx, connection);
        debug!(call_id = ?ack.call_id(), "ACK ignored");
    }

    /// A CANCEL matched server INVITE transaction `invite`. The CANCEL
    /// itself was already answered with 200.
    ///
    /// The default answers the INVITE with 487 unless it is already final.
    fn handle_cancel(
        &self,
        ctx: &mut SessionContext<'_>,
        invite: &TransactionKey,
        cancel: Request,
    ) {
        let _ = cancel;
        let request = match ctx.transaction(invite).and_then(|tx| tx.as_server()) {
            Some(tx) if !tx.has_final_response() => tx.request().clone(),
            _ => return,
        };
        match request.create_response(StatusCode::REQUEST_TERMINATED, None) {
            Ok(mut response) => {
                if response.to_tag().is_none() {
                    if let Err(e) = response.set_to_tag(&generate_tag()) {
                        warn!("Could not tag 487: {}", e);
                    }
                }
                if let Err(e) = ctx.send_response(invite, response) {
                    warn!(transaction = %invite, "Could not answer cancelled INVITE: {}", e);
                }
            }
            Err(e) => warn!(transaction = %invite, "Could not build 487: {}", e),
        }
    }

    /// Server transaction `key` timed out waiting for an ACK or for the TU
    fn transaction_timeout(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey) {
        let _ = ctx;
        warn!(transaction = %key, "Server transaction timed out");
    }
}

/// Receives the outcome of a client transaction
pub trait ClientTransactionListener: Send + Sync {
    /// A response, or a locally generated 408 when Timer B or F fired
    fn handle_response(
        &self,
        ctx: &mut SessionContext<'_>,
        key: &TransactionKey,
        response: Response,
    );

    fn transaction_terminated(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey) {
        let _ = (ctx, key);
    }
}

/// Handler that rejects every request with a fixed status
#[derive(Debug, Clone, Copy)]
pub struct RejectingHandler {
    status: StatusCode,
}

impl RejectingHandler {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl Default for RejectingHandler {
    fn default() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }
}

impl SipHandler for RejectingHandler {
    fn handle_request(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey, request: Request) {
        let result = request
            .create_response(self.status, None)
            .map_err(Error::from)
            .and_then(|mut response| {
                response.set_to_tag(&generate_tag())?;
                ctx.send_response(key, response)
            });
        if let Err(e) = result {
            warn!(transaction = %key, "Could not reject {}: {}", request.method(), e);
        }
    }
}
