//! Handler used by the standalone binary

use siplet_sip_core::{HeaderAccess, HeaderName, HeaderValue, Method, Request, StatusCode};
use siplet_transaction_core::utils::generate_tag;
use siplet_transaction_core::{Result, SessionContext, SipHandler, TransactionKey};
use tracing::{debug, warn};

/// Methods advertised in the Allow header of OPTIONS answers
pub const ALLOWED_METHODS: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS";

/// Answers OPTIONS with 200 and everything else with a fixed status
#[derive(Debug, Clone, Copy)]
pub struct OptionsResponder {
    reject_with: StatusCode,
}

impl OptionsResponder {
    pub fn new(reject_with: StatusCode) -> Self {
        Self { reject_with }
    }

    fn answer(
        &self,
        ctx: &mut SessionContext<'_>,
        key: &TransactionKey,
        request: &Request,
    ) -> Result<()> {
        let status = if *request.method() == Method::Options {
            StatusCode::OK
        } else {
            self.reject_with
        };
        let mut response = request.create_response(status, None)?;
        if response.to_tag().is_none() {
            response.set_to_tag(&generate_tag())?;
        }
        if status == StatusCode::OK {
            response.set_header(HeaderName::Allow, HeaderValue::text(ALLOWED_METHODS))?;
        }
        debug!(call_id = ctx.id(), "Answering {} with {}", request.method(), status);
        ctx.send_response(key, response)
    }
}

impl Default for OptionsResponder {
    fn default() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }
}

impl SipHandler for OptionsResponder {
    fn handle_request(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey, request: Request) {
        if let Err(e) = self.answer(ctx, key, &request) {
            warn!(transaction = %key, "Could not answer {}: {}", request.method(), e);
        }
    }
}
