use std::fmt;

use bytes::Bytes;

use super::private::Sealed;
use super::{apply_body, check_uncommitted, write_fields, HeaderAccess, Response};
use crate::error::{Error, Result};
use crate::types::{
    Address, CSeq, Fields, HeaderName, HeaderValue, Method, StatusCode, Uri, Version, Via,
};

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    fields: Fields,
    body: Bytes,
    committed: bool,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            version: Version::Sip20,
            fields: Fields::new(),
            body: Bytes::new(),
            committed: false,
        }
    }

    /// Assemble a request from already-validated parts; used by the message
    /// builder, which is allowed to populate system headers
    pub fn from_parts(
        method: Method,
        uri: Uri,
        version: Version,
        fields: Fields,
        body: Bytes,
    ) -> Self {
        Request {
            method,
            uri,
            version,
            fields,
            body,
            committed: false,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.uri = uri;
        Ok(())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_invite(&self) -> bool {
        self.method.is_invite()
    }

    pub fn is_ack(&self) -> bool {
        self.method.is_ack()
    }

    pub fn is_cancel(&self) -> bool {
        self.method.is_cancel()
    }

    /// Mark the request as sent; it is immutable from now on
    pub fn commit(&mut self) {
        self.committed = true;
    }

    // System operations

    /// Add a Via on top of the chain
    pub fn push_via(&mut self, via: Via) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields.add_first(HeaderName::Via, HeaderValue::Via(via));
        Ok(())
    }

    /// Remove the top Via, as a response does when going back downstream
    pub fn pop_via(&mut self) -> Result<Option<Via>> {
        check_uncommitted(self.committed)?;
        Ok(match self.fields.remove_first(&HeaderName::Via) {
            Some(HeaderValue::Via(via)) => Some(via),
            _ => None,
        })
    }

    pub fn push_route(&mut self, route: Address) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields.add_first(HeaderName::Route, HeaderValue::Address(route));
        Ok(())
    }

    pub fn add_record_route(&mut self, route: Address) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields
            .add_first(HeaderName::RecordRoute, HeaderValue::Address(route));
        Ok(())
    }

    /// Set From, To, Call-ID and CSeq on a request built from scratch
    pub fn set_dialog_headers(
        &mut self,
        from: Address,
        to: Address,
        call_id: &str,
        cseq: CSeq,
    ) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields.set(HeaderName::From, HeaderValue::Address(from));
        self.fields.set(HeaderName::To, HeaderValue::Address(to));
        self.fields.set(HeaderName::CallId, HeaderValue::text(call_id));
        self.fields
            .set(HeaderName::CSeq, HeaderValue::Text(cseq.to_string()));
        Ok(())
    }

    /// Replace the Route chain
    pub fn set_routes(&mut self, routes: Vec<Address>) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields.set_all(
            HeaderName::Route,
            routes.into_iter().map(HeaderValue::Address).collect(),
        );
        Ok(())
    }

    /// Replace the body, keeping Content-Length in step
    pub fn set_body(&mut self, body: impl Into<Bytes>, content_type: Option<&str>) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.body = body.into();
        apply_body(&mut self.fields, &self.body, content_type)
    }

    /// Max-Forwards, when present and numeric
    pub fn max_forwards(&self) -> Option<u32> {
        self.fields
            .text(&HeaderName::MaxForwards)
            .and_then(|v| v.trim().parse().ok())
    }

    // Factories

    /// Response carrying this request's Via, From, To, Call-ID and CSeq;
    /// Record-Route is copied for 1xx and 2xx
    pub fn create_response(&self, status: StatusCode, reason: Option<&str>) -> Result<Response> {
        if self.is_ack() {
            return Err(Error::illegal_state("Cannot create a response to ACK"));
        }
        let mut fields = Fields::new();
        for name in [
            HeaderName::Via,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            fields.copy_from(&self.fields, &name);
        }
        if status.as_u16() < 300 {
            fields.copy_from(&self.fields, &HeaderName::RecordRoute);
        }
        Ok(Response::from_parts(
            status,
            reason.map(str::to_string),
            self.version,
            fields,
            Bytes::new(),
        ))
    }

    /// New request within the same call: same Request-URI, From, To, Call-ID,
    /// top Via, Max-Forwards and Route, and the CSeq number with `method`
    pub fn create_request(&self, method: Method) -> Result<Request> {
        let cseq = self
            .cseq()
            .ok_or_else(|| Error::illegal_state("Request has no valid CSeq"))?;
        let mut request = Request::new(method.clone(), self.uri.clone());
        request.version = self.version;
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId] {
            request.fields.copy_from(&self.fields, &name);
        }
        request.fields.set(
            HeaderName::CSeq,
            HeaderValue::Text(CSeq::new(cseq.seq, method).to_string()),
        );
        if let Some(via) = self.fields.get(&HeaderName::Via) {
            request.fields.set(HeaderName::Via, via.clone());
        }
        request.fields.copy_from(&self.fields, &HeaderName::MaxForwards);
        request.fields.copy_from(&self.fields, &HeaderName::Route);
        Ok(request)
    }

    /// CANCEL for this INVITE
    pub fn create_cancel(&self) -> Result<Request> {
        if !self.is_invite() {
            return Err(Error::illegal_state(format!(
                "Cannot cancel a {} request",
                self.method
            )));
        }
        self.create_request(Method::Cancel)
    }

    /// Hop-by-hop ACK for a non-2xx final response to this INVITE
    pub fn create_ack(&self, response: &Response) -> Result<Request> {
        if !self.is_invite() {
            return Err(Error::illegal_state("Only INVITE is acknowledged"));
        }
        let mut ack = self.create_request(Method::Ack)?;
        ack.fields.copy_from(response.fields(), &HeaderName::To);
        Ok(ack)
    }
}

impl Sealed for Request {
    fn raw_fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}

impl HeaderAccess for Request {
    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn body(&self) -> &Bytes {
        &self.body
    }

    fn is_committed(&self) -> bool {
        self.committed
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri, self.version)?;
        write_fields(f, &self.fields, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        let mut request = Request::new(Method::Invite, "sip:bob@biloxi.com".parse().unwrap());
        request
            .push_via("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776".parse().unwrap())
            .unwrap();
        request
            .push_via("SIP/2.0/UDP proxy.atlanta.com;branch=z9hG4bK99".parse().unwrap())
            .unwrap();
        request
            .set_dialog_headers(
                "Alice <sip:alice@atlanta.com>;tag=1928301774".parse().unwrap(),
                "Bob <sip:bob@biloxi.com>".parse().unwrap(),
                "a84b4c76e66710",
                CSeq::new(314159, Method::Invite),
            )
            .unwrap();
        request
            .add_record_route("<sip:p1.example.com;lr>".parse().unwrap())
            .unwrap();
        request
    }

    #[test]
    fn test_push_via_goes_on_top() {
        let request = invite();
        assert_eq!(request.top_via().unwrap().branch(), Some("z9hG4bK99"));
        assert_eq!(request.vias().len(), 2);
    }

    #[test]
    fn test_create_response_copies_system_headers() {
        let request = invite();
        let ok = request.create_response(StatusCode::OK, None).unwrap();
        assert_eq!(ok.vias().len(), 2);
        assert_eq!(ok.call_id(), Some("a84b4c76e66710"));
        assert_eq!(ok.cseq(), Some(CSeq::new(314159, Method::Invite)));
        assert_eq!(ok.headers(&HeaderName::RecordRoute).len(), 1);

        let busy = request.create_response(StatusCode::BUSY_HERE, None).unwrap();
        assert!(busy.headers(&HeaderName::RecordRoute).is_empty());
    }

    #[test]
    fn test_response_addresses_are_not_shared() {
        let request = invite();
        let mut ok = request.create_response(StatusCode::OK, None).unwrap();
        ok.set_to_tag("a6c85cf").unwrap();
        assert_eq!(ok.to_header().unwrap().tag(), Some("a6c85cf"));
        assert_eq!(request.to_header().unwrap().tag(), None);
    }

    #[test]
    fn test_no_response_to_ack() {
        let ack = invite().create_request(Method::Ack).unwrap();
        assert!(matches!(
            ack.create_response(StatusCode::OK, None),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn test_create_cancel() {
        let request = invite();
        let cancel = request.create_cancel().unwrap();
        assert_eq!(cancel.method(), &Method::Cancel);
        assert_eq!(cancel.uri(), request.uri());
        assert_eq!(cancel.cseq(), Some(CSeq::new(314159, Method::Cancel)));
        assert_eq!(cancel.vias().len(), 1);
        assert_eq!(cancel.top_via(), request.top_via());

        let bye = request.create_request(Method::Bye).unwrap();
        assert!(bye.create_cancel().is_err());
    }

    #[test]
    fn test_create_ack_takes_to_from_response() {
        let request = invite();
        let mut busy = request.create_response(StatusCode::BUSY_HERE, None).unwrap();
        busy.set_to_tag("xyz").unwrap();
        let ack = request.create_ack(&busy).unwrap();
        assert_eq!(ack.to_header().unwrap().tag(), Some("xyz"));
        assert_eq!(ack.cseq(), Some(CSeq::new(314159, Method::Ack)));
    }

    #[test]
    fn test_committed_request_is_frozen() {
        let mut request = invite();
        request.commit();
        assert!(request.push_via(Via::new("UDP", "h", None, "z9hG4bK1")).is_err());
        assert!(request.set_body("x", None).is_err());
        assert!(request.set_uri("sip:x@y".parse().unwrap()).is_err());
    }

    #[test]
    fn test_set_body_maintains_content_length() {
        let mut request = invite();
        request.set_body("v=0\r\n", Some("application/sdp")).unwrap();
        assert_eq!(request.content_length(), Some(5));
        assert_eq!(request.content_type().unwrap().value(), "application/sdp");
        request.set_body(Bytes::new(), None).unwrap();
        assert_eq!(request.content_length(), Some(0));
        assert!(request.content_type().is_none());
    }
}
