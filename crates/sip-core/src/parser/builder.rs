//! Assembles [`SipMessage`] values from parser events

use bytes::Bytes;
use tracing::debug;

use super::ParserHandler;
use crate::grammar;
use crate::message::{HeaderAccess, Request, Response, SipMessage};
use crate::types::{
    CSeq, Fields, HeaderKind, HeaderName, HeaderValue, Method, StatusCode, Uri, Version,
};

/// How message boundaries are determined on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// One message per datagram or frame; Content-Length is optional
    Datagram,
    /// Byte stream; Content-Length is mandatory
    Stream,
}

/// A message the builder rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadMessage {
    pub status: u16,
    pub reason: String,
    /// What was parsed of the request, when there is enough to answer it
    pub request: Option<Request>,
}

impl BadMessage {
    /// Error response for the partial request, when one can be built
    pub fn error_response(&self) -> Option<Response> {
        let request = self.request.as_ref()?;
        let status = StatusCode::from_u16(self.status).ok()?;
        request.create_response(status, Some(&self.reason)).ok()
    }
}

#[derive(Debug)]
enum StartLine {
    Request { method: Method, uri: Uri, version: Version },
    Response { version: Version, status: StatusCode, reason: String },
}

/// [`ParserHandler`] that builds structured messages.
///
/// Header values are parsed according to their [`HeaderKind`]; comma lists of
/// structured list headers (Via, Route, Contact...) become separate fields.
#[derive(Debug)]
pub struct MessageBuilder {
    framing: Framing,
    start: Option<StartLine>,
    fields: Fields,
    header_error: Option<String>,
    message: Option<SipMessage>,
    bad: Option<BadMessage>,
}

impl MessageBuilder {
    pub fn new(framing: Framing) -> Self {
        MessageBuilder {
            framing,
            start: None,
            fields: Fields::new(),
            header_error: None,
            message: None,
            bad: None,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// The completed message, if any
    pub fn take_message(&mut self) -> Option<SipMessage> {
        self.message.take()
    }

    /// The rejected message, if any
    pub fn take_bad(&mut self) -> Option<BadMessage> {
        self.bad.take()
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.fields = Fields::new();
        self.header_error = None;
        self.message = None;
        self.bad = None;
    }

    fn partial_request(&mut self) -> Option<Request> {
        match self.start.as_ref()? {
            StartLine::Request { method, uri, version } => Some(Request::from_parts(
                method.clone(),
                uri.clone(),
                *version,
                std::mem::take(&mut self.fields),
                Bytes::new(),
            )),
            StartLine::Response { .. } => None,
        }
    }

    fn reject(&mut self, status: u16, reason: &str) {
        debug!(status, reason, "Rejecting message");
        let request = self.partial_request();
        self.bad = Some(BadMessage {
            status,
            reason: reason.to_string(),
            request,
        });
    }

    /// Check the headers every request must carry
    fn validate_request(&self, method: &Method) -> Result<(), String> {
        let top_via = self.fields.get(&HeaderName::Via).and_then(HeaderValue::as_via);
        if top_via.is_none() {
            return Err("Missing Via".to_string());
        }
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId] {
            if !self.fields.contains(&name) {
                return Err(format!("Missing {}", name));
            }
        }
        let cseq = self
            .fields
            .text(&HeaderName::CSeq)
            .ok_or_else(|| "Missing CSeq".to_string())?;
        let cseq = CSeq::parse(cseq).map_err(|_| "Bad CSeq".to_string())?;
        if &cseq.method != method {
            return Err("CSeq method mismatch".to_string());
        }
        Ok(())
    }

    fn validate_response(&self) -> Result<(), String> {
        if self.fields.get(&HeaderName::Via).is_none() {
            return Err("Missing Via".to_string());
        }
        match self.fields.text(&HeaderName::CSeq).map(CSeq::parse) {
            Some(Ok(_)) => Ok(()),
            Some(Err(_)) => Err("Bad CSeq".to_string()),
            None => Err("Missing CSeq".to_string()),
        }
    }
}

impl ParserHandler for MessageBuilder {
    fn start_request(&mut self, method: Method, uri: &str, version: Version) -> bool {
        match Uri::parse(uri) {
            Ok(uri) => {
                self.start = Some(StartLine::Request { method, uri, version });
                false
            }
            Err(e) => {
                debug!(error = %e, "Bad Request-URI");
                self.reject(400, "Bad Request-URI");
                true
            }
        }
    }

    fn start_response(&mut self, version: Version, status: u16, reason: &str) -> bool {
        match StatusCode::from_u16(status) {
            Ok(status) => {
                self.start = Some(StartLine::Response {
                    version,
                    status,
                    reason: reason.to_string(),
                });
                false
            }
            Err(_) => {
                self.reject(400, "Bad status");
                true
            }
        }
    }

    fn parsed_header(&mut self, name: HeaderName, value: &str) -> bool {
        let structured = name.kind() != HeaderKind::Text;
        let parts = if structured && name.is_list() {
            grammar::split_list(value)
        } else {
            vec![value]
        };
        if parts.is_empty() && structured {
            self.header_error.get_or_insert_with(|| format!("Empty {}", name));
        }
        for part in parts {
            match HeaderValue::parse(&name, part) {
                Ok(parsed) => self.fields.add(name.clone(), parsed),
                Err(e) => {
                    debug!(header = %name, error = %e, "Invalid header value");
                    self.header_error.get_or_insert_with(|| format!("Bad {}", name));
                    self.fields.add(name.clone(), HeaderValue::text(part));
                }
            }
        }
        false
    }

    fn header_complete(&mut self) -> bool {
        if let Some(reason) = self.header_error.take() {
            self.reject(400, &reason);
            return true;
        }
        let valid = match &self.start {
            Some(StartLine::Request { method, .. }) => self.validate_request(method),
            Some(StartLine::Response { .. }) => self.validate_response(),
            None => Err("Missing start line".to_string()),
        };
        if let Err(reason) = valid {
            self.reject(400, &reason);
            return true;
        }
        if self.framing == Framing::Stream && !self.fields.contains(&HeaderName::ContentLength) {
            self.reject(400, "Content-Length is mandatory");
            return true;
        }
        false
    }

    fn message_complete(&mut self, content: Bytes) -> bool {
        let fields = std::mem::take(&mut self.fields);
        self.message = match self.start.take() {
            Some(StartLine::Request { method, uri, version }) => Some(SipMessage::Request(
                Request::from_parts(method, uri, version, fields, content),
            )),
            Some(StartLine::Response { version, status, reason }) => {
                let reason = (!reason.is_empty()).then_some(reason);
                Some(SipMessage::Response(Response::from_parts(
                    status, reason, version, fields, content,
                )))
            }
            None => None,
        };
        if let Some(message) = &self.message {
            if let Some(declared) = message.content_length() {
                if declared != message.body().len() {
                    debug!(declared, actual = message.body().len(), "Content-Length mismatch");
                }
            }
        }
        false
    }

    fn bad_message(&mut self, status: u16, reason: &str) {
        self.reject(status, reason);
    }
}
