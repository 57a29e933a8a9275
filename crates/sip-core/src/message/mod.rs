//! # SIP messages
//!
//! [`Request`] and [`Response`] own a [`Fields`] multi-map and a body. Both
//! share the [`HeaderAccess`] accessors, which enforce two rules:
//!
//! - system headers (Via, From, To, Call-ID, CSeq, Route, Record-Route,
//!   RAck, RSeq, Content-Length) can only change through dedicated system
//!   operations such as [`Request::push_via`], [`Response::set_to_tag`] or
//!   `set_body`;
//! - once a message is committed (handed to a transport) nothing about it
//!   can change, and every mutator returns [`Error::IllegalState`].
//!
//! ```rust
//! use siplet_sip_core::{Error, HeaderAccess, HeaderName, HeaderValue, Method, Request};
//!
//! let mut request = Request::new(Method::Options, "sip:bob@biloxi.com".parse().unwrap());
//! request.set_header(HeaderName::Subject, HeaderValue::text("ping")).unwrap();
//! assert!(matches!(
//!     request.set_header(HeaderName::CallId, HeaderValue::text("x")),
//!     Err(Error::SystemHeader(HeaderName::CallId))
//! ));
//!
//! request.commit();
//! assert!(request.set_header(HeaderName::Subject, HeaderValue::text("late")).is_err());
//! ```

mod request;
mod response;

use std::fmt;

use bytes::Bytes;

pub use request::Request;
pub use response::Response;

use crate::error::{Error, Result};
use crate::types::{Address, CSeq, Fields, HeaderName, HeaderValue, Parameterable, Via};

mod private {
    pub trait Sealed {
        fn raw_fields_mut(&mut self) -> &mut crate::types::Fields;
    }
}

/// Header accessors shared by requests and responses
pub trait HeaderAccess: private::Sealed {
    fn fields(&self) -> &Fields;

    fn body(&self) -> &Bytes;

    /// Committed messages are immutable
    fn is_committed(&self) -> bool;

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.fields().get(name)
    }

    fn headers(&self, name: &HeaderName) -> &[HeaderValue] {
        self.fields().get_all(name)
    }

    /// First value of a text header
    fn header_text(&self, name: &HeaderName) -> Option<&str> {
        self.fields().text(name)
    }

    fn call_id(&self) -> Option<&str> {
        self.header_text(&HeaderName::CallId)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.header_text(&HeaderName::CSeq)
            .and_then(|raw| CSeq::parse(raw).ok())
    }

    fn from_header(&self) -> Option<&Address> {
        self.fields().address(&HeaderName::From)
    }

    fn to_header(&self) -> Option<&Address> {
        self.fields().address(&HeaderName::To)
    }

    fn top_via(&self) -> Option<&Via> {
        self.header(&HeaderName::Via).and_then(HeaderValue::as_via)
    }

    fn vias(&self) -> Vec<&Via> {
        self.headers(&HeaderName::Via)
            .iter()
            .filter_map(HeaderValue::as_via)
            .collect()
    }

    fn content_length(&self) -> Option<usize> {
        self.header_text(&HeaderName::ContentLength)
            .and_then(|raw| raw.trim().parse().ok())
    }

    fn content_type(&self) -> Option<&Parameterable> {
        self.header(&HeaderName::ContentType)
            .and_then(HeaderValue::as_parameterable)
    }

    /// Replace all values of an application header
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        check_mutable(self, &name)?;
        self.raw_fields_mut().set(name, value);
        Ok(())
    }

    /// Append a value to an application header
    fn add_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        check_mutable(self, &name)?;
        self.raw_fields_mut().add(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<Option<Vec<HeaderValue>>> {
        check_mutable(self, name)?;
        Ok(self.raw_fields_mut().remove(name))
    }
}

fn check_mutable<M: HeaderAccess + ?Sized>(message: &M, name: &HeaderName) -> Result<()> {
    if message.is_committed() {
        return Err(Error::illegal_state("Message is committed"));
    }
    if name.is_system() {
        return Err(Error::SystemHeader(name.clone()));
    }
    Ok(())
}

fn check_uncommitted(committed: bool) -> Result<()> {
    if committed {
        Err(Error::illegal_state("Message is committed"))
    } else {
        Ok(())
    }
}

/// Replace the body and keep Content-Length (and optionally Content-Type)
/// in step with it
fn apply_body(fields: &mut Fields, body: &Bytes, content_type: Option<&str>) -> Result<()> {
    fields.set(
        HeaderName::ContentLength,
        HeaderValue::Text(body.len().to_string()),
    );
    match content_type {
        Some(ct) => fields.set(
            HeaderName::ContentType,
            HeaderValue::Parameterable(Parameterable::parse(ct)?),
        ),
        None if body.is_empty() => {
            fields.remove(&HeaderName::ContentType);
        }
        None => {}
    }
    Ok(())
}

/// A parsed or locally created SIP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            SipMessage::Request(r) => Some(r),
            SipMessage::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            SipMessage::Response(r) => Some(r),
            SipMessage::Request(_) => None,
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            SipMessage::Request(r) => Some(r),
            SipMessage::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            SipMessage::Response(r) => Some(r),
            SipMessage::Request(_) => None,
        }
    }

    fn inner(&self) -> &dyn HeaderAccess {
        match self {
            SipMessage::Request(r) => r,
            SipMessage::Response(r) => r,
        }
    }
}

impl private::Sealed for SipMessage {
    fn raw_fields_mut(&mut self) -> &mut Fields {
        match self {
            SipMessage::Request(r) => r.raw_fields_mut(),
            SipMessage::Response(r) => r.raw_fields_mut(),
        }
    }
}

impl HeaderAccess for SipMessage {
    fn fields(&self) -> &Fields {
        self.inner().fields()
    }

    fn body(&self) -> &Bytes {
        self.inner().body()
    }

    fn is_committed(&self) -> bool {
        self.inner().is_committed()
    }
}

impl From<Request> for SipMessage {
    fn from(r: Request) -> Self {
        SipMessage::Request(r)
    }
}

impl From<Response> for SipMessage {
    fn from(r: Response) -> Self {
        SipMessage::Response(r)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(r) => fmt::Display::fmt(r, f),
            SipMessage::Response(r) => fmt::Display::fmt(r, f),
        }
    }
}

/// Shared textual rendering used by `Display`, for logs
pub(crate) fn write_fields(
    f: &mut fmt::Formatter<'_>,
    fields: &Fields,
    body: &Bytes,
) -> fmt::Result {
    for (name, value) in fields.iter() {
        write!(f, "{}: {}\r\n", name, value)?;
    }
    f.write_str("\r\n")?;
    if !body.is_empty() {
        f.write_str(&String::from_utf8_lossy(body))?;
    }
    Ok(())
}
