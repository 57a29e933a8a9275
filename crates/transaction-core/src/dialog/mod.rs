//! # SIP Dialogs
//!
//! Peer-to-peer relationship between two user agents (RFC 3261 §12),
//! identified by Call-ID, local tag and remote tag. A dialog remembers the
//! route set, the remote target and both CSeq spaces, and builds requests
//! that stay inside it.
//!
//! ```text
//!        1xx with To tag           2xx
//!  (none) ───────────────▶ Early ────────▶ Confirmed
//!                            │                 │
//!                            └── 3xx-6xx ──────┴── BYE ──▶ Terminated
//! ```

use std::fmt;

use tracing::{debug, warn};

use siplet_sip_core::{
    Address, CSeq, HeaderAccess, HeaderName, HeaderValue, Method, Request, Response, Uri,
};

use crate::error::{Error, Result};

/// Max-Forwards placed on requests built by a dialog
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Dialog identifier: Call-ID plus both tags, seen from the local side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};local={};remote={}", self.call_id, self.local_tag, self.remote_tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A SIP dialog
#[derive(Debug, Clone)]
pub struct Dialog {
    id: DialogId,
    state: DialogState,
    local_party: Address,
    remote_party: Address,
    local_seq: u32,
    remote_seq: Option<u32>,
    invite_seq: Option<u32>,
    remote_target: Uri,
    route_set: Vec<Address>,
    secure: bool,
    initiator: bool,
}

impl Dialog {
    /// Dialog on the calling side, from the request that created it and a
    /// 101-299 response carrying a To tag
    pub fn new_uac(request: &Request, response: &Response) -> Result<Self> {
        let code = response.status().as_u16();
        if !(101..300).contains(&code) {
            return Err(Error::illegal_state(format!(
                "A {} response does not create a dialog",
                code
            )));
        }
        let call_id = request.call_id().ok_or(Error::MissingHeader("Call-ID"))?;
        let cseq = request.cseq().ok_or(Error::MissingHeader("CSeq"))?;
        let from = request.from_header().ok_or(Error::MissingHeader("From"))?;
        let to = response.to_header().ok_or(Error::MissingHeader("To"))?;
        let local_tag = from
            .tag()
            .ok_or_else(|| Error::illegal_state("Request has no From tag"))?;
        let remote_tag = to
            .tag()
            .ok_or_else(|| Error::illegal_state("Response has no To tag"))?;

        let remote_target = contact_uri(response).unwrap_or_else(|| {
            warn!(call_id, "No Contact in dialog-creating response, using the Request-URI");
            request.uri().clone()
        });
        // UAC: Record-Route of the response in reverse order
        let mut route_set = record_routes(response);
        route_set.reverse();

        let dialog = Self {
            id: DialogId {
                call_id: call_id.to_string(),
                local_tag: local_tag.to_string(),
                remote_tag: remote_tag.to_string(),
            },
            state: if response.is_provisional() {
                DialogState::Early
            } else {
                DialogState::Confirmed
            },
            local_party: from.clone(),
            remote_party: to.clone(),
            local_seq: cseq.seq,
            remote_seq: None,
            invite_seq: request.is_invite().then_some(cseq.seq),
            remote_target,
            route_set,
            secure: is_secure(request.uri()),
            initiator: true,
        };
        debug!(dialog = %dialog.id, state = %dialog.state, "UAC dialog created");
        Ok(dialog)
    }

    /// Dialog on the called side. `local_tag` is the To tag placed on the
    /// responses.
    pub fn new_uas(request: &Request, local_tag: &str) -> Result<Self> {
        let call_id = request.call_id().ok_or(Error::MissingHeader("Call-ID"))?;
        let cseq = request.cseq().ok_or(Error::MissingHeader("CSeq"))?;
        let from = request.from_header().ok_or(Error::MissingHeader("From"))?;
        let to = request.to_header().ok_or(Error::MissingHeader("To"))?;
        let remote_tag = from
            .tag()
            .ok_or_else(|| Error::illegal_state("Request has no From tag"))?;

        let remote_target = contact_uri(request).unwrap_or_else(|| {
            warn!(call_id, "No Contact in dialog-creating request, using the From URI");
            from.uri().cloned().unwrap_or_else(|| request.uri().clone())
        });

        let dialog = Self {
            id: DialogId {
                call_id: call_id.to_string(),
                local_tag: local_tag.to_string(),
                remote_tag: remote_tag.to_string(),
            },
            state: DialogState::Early,
            local_party: to.clone().with_tag(local_tag),
            remote_party: from.clone(),
            local_seq: 0,
            remote_seq: Some(cseq.seq),
            invite_seq: request.is_invite().then_some(cseq.seq),
            remote_target,
            // UAS: Record-Route of the request in order
            route_set: record_routes(request),
            secure: is_secure(request.uri()),
            initiator: false,
        };
        debug!(dialog = %dialog.id, "UAS dialog created");
        Ok(dialog)
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn call_id(&self) -> &str {
        &self.id.call_id
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn local_seq(&self) -> u32 {
        self.local_seq
    }

    pub fn remote_seq(&self) -> Option<u32> {
        self.remote_seq
    }

    pub fn remote_target(&self) -> &Uri {
        &self.remote_target
    }

    pub fn route_set(&self) -> &[Address] {
        &self.route_set
    }

    pub fn local_party(&self) -> &Address {
        &self.local_party
    }

    pub fn remote_party(&self) -> &Address {
        &self.remote_party
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    /// Apply a response received within the dialog (UAC side).
    ///
    /// A 2xx confirms an early dialog and refreshes the remote target; a
    /// non-2xx final response to the dialog-creating INVITE ends an early
    /// dialog.
    pub fn update_from_response(&mut self, response: &Response) {
        if self.is_terminated() {
            return;
        }
        let code = response.status().as_u16();
        if (101..300).contains(&code) {
            if let Some(target) = contact_uri(response) {
                self.remote_target = target;
            }
        }
        match (self.state, code) {
            (DialogState::Early, 200..=299) => self.set_state(DialogState::Confirmed),
            (DialogState::Early, 300..=699) => self.set_state(DialogState::Terminated),
            _ => {}
        }
    }

    /// Mark an early dialog as confirmed, as the UAS does once it sent a 2xx
    pub fn confirm(&mut self) {
        if self.state == DialogState::Early {
            self.set_state(DialogState::Confirmed);
        }
    }

    pub fn terminate(&mut self) {
        self.set_state(DialogState::Terminated);
    }

    /// Build a request within the dialog.
    ///
    /// The local CSeq is incremented, except for ACK and CANCEL which reuse
    /// the CSeq number of the INVITE. Request-URI and Route follow the route
    /// set (RFC 3261 §12.2.1.1). No Via is added; the transaction layer
    /// does that when the request is sent.
    pub fn create_request(&mut self, method: Method) -> Result<Request> {
        if self.is_terminated() {
            return Err(Error::illegal_state(format!(
                "Dialog {} is terminated",
                self.id
            )));
        }

        let seq = if method.is_ack() || method.is_cancel() {
            self.invite_seq
                .ok_or_else(|| Error::illegal_state(format!("No INVITE in dialog to {}", method)))?
        } else {
            self.local_seq += 1;
            self.local_seq
        };
        if method.is_invite() {
            self.invite_seq = Some(seq);
        }

        let (uri, routes) = self.request_target();
        let mut request = Request::new(method.clone(), uri);
        request.set_dialog_headers(
            self.local_party.clone().with_tag(&self.id.local_tag),
            self.remote_party.clone().with_tag(&self.id.remote_tag),
            &self.id.call_id,
            CSeq::new(seq, method),
        )?;
        request.set_routes(routes)?;
        request.set_header(
            HeaderName::MaxForwards,
            HeaderValue::text(DEFAULT_MAX_FORWARDS.to_string()),
        )?;
        Ok(request)
    }

    /// Check an incoming request against the remote CSeq space.
    ///
    /// Requests other than ACK and CANCEL must carry a CSeq higher than
    /// the last one seen. A target refresh (INVITE, UPDATE) with a Contact
    /// replaces the remote target.
    pub fn validate_remote_request(&mut self, request: &Request) -> Result<()> {
        if request.call_id() != Some(self.id.call_id.as_str()) {
            return Err(Error::illegal_state("Request belongs to another call"));
        }
        let cseq = request.cseq().ok_or(Error::MissingHeader("CSeq"))?;
        if request.is_ack() || request.is_cancel() {
            return Ok(());
        }
        if let Some(last) = self.remote_seq {
            if cseq.seq <= last {
                return Err(Error::illegal_state(format!(
                    "Out of order CSeq {} (last {})",
                    cseq.seq, last
                )));
            }
        }
        self.remote_seq = Some(cseq.seq);
        if matches!(request.method(), Method::Invite | Method::Update) {
            if let Some(target) = contact_uri(request) {
                self.remote_target = target;
            }
        }
        if request.method() == &Method::Bye {
            self.set_state(DialogState::Terminated);
        }
        Ok(())
    }

    fn request_target(&self) -> (Uri, Vec<Address>) {
        let first_loose = self.route_set.first().map(|route| {
            route
                .uri()
                .and_then(Uri::as_sip)
                .map_or(false, |sip| sip.is_loose_route())
        });
        match first_loose {
            None | Some(true) => (self.remote_target.clone(), self.route_set.clone()),
            Some(false) => {
                // Strict router: it becomes the Request-URI and the remote
                // target goes last in the Route set
                let mut routes: Vec<Address> = self.route_set[1..].to_vec();
                routes.push(Address::new(self.remote_target.clone()));
                let uri = self.route_set[0]
                    .uri()
                    .cloned()
                    .unwrap_or_else(|| self.remote_target.clone());
                (uri, routes)
            }
        }
    }

    fn set_state(&mut self, state: DialogState) {
        if self.state != state {
            debug!(dialog = %self.id, from = %self.state, to = %state, "Dialog state change");
            self.state = state;
        }
    }
}

fn contact_uri<M: HeaderAccess>(message: &M) -> Option<Uri> {
    message
        .header(&HeaderName::Contact)
        .and_then(HeaderValue::as_address)
        .and_then(Address::uri)
        .cloned()
}

fn record_routes<M: HeaderAccess>(message: &M) -> Vec<Address> {
    message
        .headers(&HeaderName::RecordRoute)
        .iter()
        .filter_map(HeaderValue::as_address)
        .cloned()
        .collect()
}

fn is_secure(uri: &Uri) -> bool {
    uri.as_sip().map_or(false, |sip| sip.is_secure())
}

#[cfg(test)]
mod tests {
    use siplet_sip_core::StatusCode;

    use super::*;

    fn invite() -> Request {
        let uri = "sip:bob@biloxi.example.com".parse().unwrap();
        let mut request = Request::new(Method::Invite, uri);
        let via = "SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776asdhds";
        request.push_via(via.parse().unwrap()).unwrap();
        request
            .set_dialog_headers(
                "Alice <sip:alice@atlanta.example.com>;tag=1928301774".parse().unwrap(),
                "Bob <sip:bob@biloxi.example.com>".parse().unwrap(),
                "a84b4c76e66710@pc33.atlanta.example.com",
                CSeq::new(314159, Method::Invite),
            )
            .unwrap();
        let contact = "<sip:alice@pc33.atlanta.example.com>".parse().unwrap();
        request.add_header(HeaderName::Contact, HeaderValue::Address(contact)).unwrap();
        request
    }

    fn ok(request: &Request) -> Response {
        let mut response = request.create_response(StatusCode::OK, None).unwrap();
        response.set_to_tag("a6c85cf").unwrap();
        let contact = "<sip:bob@192.0.2.4>".parse().unwrap();
        response.add_header(HeaderName::Contact, HeaderValue::Address(contact)).unwrap();
        response
    }

    #[test]
    fn test_uac_dialog_from_2xx() {
        let mut request = invite();
        request.add_record_route("<sip:p2.example.com;lr>".parse().unwrap()).unwrap();
        request.add_record_route("<sip:p1.example.com;lr>".parse().unwrap()).unwrap();
        let response = ok(&request);

        let dialog = Dialog::new_uac(&request, &response).unwrap();
        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert_eq!(dialog.id().local_tag, "1928301774");
        assert_eq!(dialog.id().remote_tag, "a6c85cf");
        assert_eq!(dialog.remote_target().to_string(), "sip:bob@192.0.2.4");
        let routes: Vec<String> = dialog.route_set().iter().map(|r| r.to_string()).collect();
        assert_eq!(routes, vec!["<sip:p2.example.com;lr>", "<sip:p1.example.com;lr>"]);
    }

    #[test]
    fn test_uas_route_set_keeps_order() {
        let mut request = invite();
        request.add_record_route("<sip:p2.example.com;lr>".parse().unwrap()).unwrap();
        request.add_record_route("<sip:p1.example.com;lr>".parse().unwrap()).unwrap();
        let dialog = Dialog::new_uas(&request, "local1").unwrap();
        assert_eq!(dialog.state(), DialogState::Early);
        assert_eq!(dialog.route_set()[0].to_string(), "<sip:p1.example.com;lr>");
        assert_eq!(dialog.remote_target().to_string(), "sip:alice@pc33.atlanta.example.com");
        assert_eq!(dialog.local_party().tag(), Some("local1"));
    }

    #[test]
    fn test_provisional_without_tag_creates_no_dialog() {
        let request = invite();
        let trying = request.create_response(StatusCode::TRYING, None).unwrap();
        assert!(Dialog::new_uac(&request, &trying).is_err());
        let ringing = request.create_response(StatusCode::RINGING, None).unwrap();
        assert!(matches!(Dialog::new_uac(&request, &ringing), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_early_dialog_confirmed_by_2xx() {
        let request = invite();
        let mut ringing = request.create_response(StatusCode::RINGING, None).unwrap();
        ringing.set_to_tag("a6c85cf").unwrap();
        let mut dialog = Dialog::new_uac(&request, &ringing).unwrap();
        assert_eq!(dialog.state(), DialogState::Early);
        dialog.update_from_response(&ok(&request));
        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert_eq!(dialog.remote_target().to_string(), "sip:bob@192.0.2.4");
    }

    #[test]
    fn test_requests_in_dialog() {
        let request = invite();
        let mut dialog = Dialog::new_uac(&request, &ok(&request)).unwrap();

        let ack = dialog.create_request(Method::Ack).unwrap();
        assert_eq!(ack.cseq().unwrap(), CSeq::new(314159, Method::Ack));
        assert_eq!(ack.uri().to_string(), "sip:bob@192.0.2.4");
        assert_eq!(ack.to_header().unwrap().tag(), Some("a6c85cf"));
        assert!(ack.top_via().is_none());

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.cseq().unwrap().seq, 314160);
        assert_eq!(bye.from_header().unwrap().tag(), Some("1928301774"));
        assert_eq!(bye.call_id(), Some("a84b4c76e66710@pc33.atlanta.example.com"));
        assert_eq!(bye.max_forwards(), Some(DEFAULT_MAX_FORWARDS));

        dialog.terminate();
        assert!(matches!(dialog.create_request(Method::Bye), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_strict_route_becomes_request_uri() {
        let mut request = invite();
        request.add_record_route("<sip:strict.example.com>".parse().unwrap()).unwrap();
        let mut dialog = Dialog::new_uac(&request, &ok(&request)).unwrap();
        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.uri().to_string(), "sip:strict.example.com");
        let routes: Vec<String> = bye
            .headers(&HeaderName::Route)
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(routes, vec!["<sip:bob@192.0.2.4>"]);
    }

    #[test]
    fn test_remote_cseq_must_increase() {
        let request = invite();
        let mut dialog = Dialog::new_uas(&request, "local1").unwrap();

        let target = "sip:alice@pc33.atlanta.example.com".parse().unwrap();
        let mut bye = Request::new(Method::Bye, target);
        bye.set_dialog_headers(
            "Alice <sip:alice@atlanta.example.com>;tag=1928301774".parse().unwrap(),
            "Bob <sip:bob@biloxi.example.com>;tag=local1".parse().unwrap(),
            "a84b4c76e66710@pc33.atlanta.example.com",
            CSeq::new(314159, Method::Bye),
        )
        .unwrap();
        assert!(matches!(dialog.validate_remote_request(&bye), Err(Error::IllegalState(_))));

        let mut next = bye.clone();
        next.set_dialog_headers(
            "Alice <sip:alice@atlanta.example.com>;tag=1928301774".parse().unwrap(),
            "Bob <sip:bob@biloxi.example.com>;tag=local1".parse().unwrap(),
            "a84b4c76e66710@pc33.atlanta.example.com",
            CSeq::new(314160, Method::Bye),
        )
        .unwrap();
        dialog.validate_remote_request(&next).unwrap();
        assert_eq!(dialog.remote_seq(), Some(314160));
        assert!(dialog.is_terminated());
    }
}
