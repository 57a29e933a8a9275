use std::fmt;

use bytes::Bytes;

use super::private::Sealed;
use super::{apply_body, check_uncommitted, write_fields, HeaderAccess};
use crate::error::{Error, Result};
use crate::types::{Address, Fields, HeaderName, HeaderValue, StatusCode, Version};

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    version: Version,
    fields: Fields,
    body: Bytes,
    committed: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response::from_parts(status, None, Version::Sip20, Fields::new(), Bytes::new())
    }

    /// Assemble a response from already-validated parts
    pub fn from_parts(
        status: StatusCode,
        reason: Option<String>,
        version: Version,
        fields: Fields,
        body: Bytes,
    ) -> Self {
        Response {
            status,
            reason,
            version,
            fields,
            body,
            committed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase: the explicit one, else the default for the status
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.reason_phrase())
            .unwrap_or("")
    }

    /// Reason phrase set by the application or read off the wire
    pub fn explicit_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_reason(&mut self, reason: Option<&str>) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.reason = reason.map(str::to_string);
        Ok(())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_provisional(&self) -> bool {
        self.status.is_provisional()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Mark the response as sent; it is immutable from now on
    pub fn commit(&mut self) {
        self.committed = true;
    }

    /// Set the To tag. A tag that is already present cannot be changed.
    pub fn set_to_tag(&mut self, tag: &str) -> Result<()> {
        check_uncommitted(self.committed)?;
        let to = self
            .fields
            .get_mut(&HeaderName::To)
            .and_then(HeaderValue::as_address_mut)
            .ok_or_else(|| Error::illegal_state("Response has no To header"))?;
        match to.tag() {
            Some(existing) if existing != tag => Err(Error::illegal_state(format!(
                "To tag already set to {}",
                existing
            ))),
            _ => {
                to.set_tag(tag);
                Ok(())
            }
        }
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to_header().and_then(Address::tag)
    }

    /// Replace the body, keeping Content-Length in step
    pub fn set_body(&mut self, body: impl Into<Bytes>, content_type: Option<&str>) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.body = body.into();
        apply_body(&mut self.fields, &self.body, content_type)
    }

    /// Drop the top Via, as a proxy does before forwarding upstream
    pub fn pop_via(&mut self) -> Result<()> {
        check_uncommitted(self.committed)?;
        self.fields.remove_first(&HeaderName::Via);
        Ok(())
    }
}

impl Sealed for Response {
    fn raw_fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }
}

impl HeaderAccess for Response {
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

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.version, self.status.as_u16(), self.reason())?;
        write_fields(f, &self.fields, &self.body)
    }
}
