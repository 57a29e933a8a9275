//! # Message generator
//!
//! Serializes [`Request`] and [`Response`] values into a caller-provided
//! [`FixedBuffer`]. The buffer never grows past its capacity: a message that
//! does not fit fails with [`Error::MessageTooLong`] and nothing truncated
//! is ever handed to a transport.
//!
//! Status lines for every status code with a default reason phrase are
//! rendered once, at first use, and copied from a table afterwards.
//!
//! ```rust
//! use siplet_sip_core::{FixedBuffer, Generator, Method, Request};
//!
//! let request = Request::new(Method::Options, "sip:bob@biloxi.com".parse().unwrap());
//! let mut buffer = FixedBuffer::new(1500);
//! Generator::new().generate_request(&request, &mut buffer).unwrap();
//! assert!(buffer.as_bytes().starts_with(b"OPTIONS sip:bob@biloxi.com SIP/2.0\r\n"));
//!
//! let mut tiny = FixedBuffer::new(8);
//! let err = Generator::new().generate_request(&request, &mut tiny).unwrap_err();
//! assert!(err.is_message_too_long());
//! ```

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::grammar::CRLF;
use crate::message::{HeaderAccess, Request, Response, SipMessage};
use crate::types::{reason_phrase, Fields, HeaderName, HeaderValue, Version};

/// Status line prepared for one status code
struct PreparedStatus {
    /// `SIP/2.0 200 OK\r\n`
    line: Vec<u8>,
    /// `SIP/2.0 200 `, followed by an explicit reason
    prefix: Vec<u8>,
}

lazy_static! {
    static ref PREPARED: HashMap<u16, PreparedStatus> = (100u16..700)
        .filter_map(|code| {
            reason_phrase(code).map(|reason| {
                let prefix = format!("{} {} ", Version::Sip20, code).into_bytes();
                let mut line = prefix.clone();
                line.extend_from_slice(reason.as_bytes());
                line.extend_from_slice(CRLF);
                (code, PreparedStatus { line, prefix })
            })
        })
        .collect();
}

/// Initial allocation; the buffer grows on demand up to its capacity
const INITIAL_ALLOCATION: usize = 2048;

/// Byte buffer with a hard capacity
#[derive(Debug)]
pub struct FixedBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl FixedBuffer {
    pub fn new(capacity: usize) -> Self {
        FixedBuffer {
            buf: BytesMut::with_capacity(capacity.min(INITIAL_ALLOCATION)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append `bytes`, or fail without writing anything if they do not fit
    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(Error::MessageTooLong {
                capacity: self.capacity,
            });
        }
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn put_str(&mut self, s: &str) -> Result<()> {
        self.put(s.as_bytes())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes, leaving the buffer empty and reusable
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Header name spelling used on output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderForm {
    #[default]
    Long,
    /// Single-letter names where the header has one
    Compact,
}

/// Writes messages to wire format
#[derive(Debug, Clone, Default)]
pub struct Generator {
    header_form: HeaderForm,
    merge_lists: bool,
}

impl Generator {
    pub fn new() -> Self {
        Generator::default()
    }

    pub fn with_header_form(mut self, form: HeaderForm) -> Self {
        self.header_form = form;
        self
    }

    /// Join repeated values of list headers into one comma-separated line
    pub fn with_merged_lists(mut self, merge: bool) -> Self {
        self.merge_lists = merge;
        self
    }

    pub fn header_form(&self) -> HeaderForm {
        self.header_form
    }

    pub fn generate_request(&self, request: &Request, out: &mut FixedBuffer) -> Result<()> {
        let line = format!("{} {} {}\r\n", request.method(), request.uri(), request.version());
        let start = out.len();
        self.write_all(out, line.as_bytes(), request.fields(), request.body())
            .inspect_err(|_| out.buf.truncate(start))
    }

    pub fn generate_response(&self, response: &Response, out: &mut FixedBuffer) -> Result<()> {
        let start = out.len();
        self.write_response(response, out)
            .inspect_err(|_| out.buf.truncate(start))
    }

    pub fn generate(&self, message: &SipMessage, out: &mut FixedBuffer) -> Result<()> {
        match message {
            SipMessage::Request(r) => self.generate_request(r, out),
            SipMessage::Response(r) => self.generate_response(r, out),
        }
    }

    /// Generate into a fresh buffer of `capacity` bytes
    pub fn to_bytes(&self, message: &SipMessage, capacity: usize) -> Result<Bytes> {
        let mut out = FixedBuffer::new(capacity);
        self.generate(message, &mut out)?;
        Ok(out.freeze())
    }

    fn write_response(&self, response: &Response, out: &mut FixedBuffer) -> Result<()> {
        let code = response.status().as_u16();
        match (PREPARED.get(&code), response.explicit_reason()) {
            (Some(prepared), None) if response.version() == Version::Sip20 => {
                out.put(&prepared.line)?;
            }
            (Some(prepared), Some(reason)) if response.version() == Version::Sip20 => {
                out.put(&prepared.prefix)?;
                out.put_str(reason)?;
                out.put(CRLF)?;
            }
            _ => {
                let line = format!("{} {} {}\r\n", response.version(), code, response.reason());
                out.put_str(&line)?;
            }
        }
        self.write_all(out, &[], response.fields(), response.body())
    }

    fn write_all(
        &self,
        out: &mut FixedBuffer,
        start_line: &[u8],
        fields: &Fields,
        body: &Bytes,
    ) -> Result<()> {
        out.put(start_line)?;
        self.write_fields(out, fields)?;
        if !fields.contains(&HeaderName::ContentLength) {
            out.put_str(&format!(
                "{}: {}\r\n",
                HeaderName::ContentLength.wire_name(self.compact()),
                body.len()
            ))?;
        }
        out.put(CRLF)?;
        out.put(body)
    }

    fn write_fields(&self, out: &mut FixedBuffer, fields: &Fields) -> Result<()> {
        for (name, values) in fields.chains() {
            let wire_name = name.wire_name(self.compact());
            if self.merge_lists && name.is_list() && values.len() > 1 {
                let joined = values
                    .iter()
                    .map(HeaderValue::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write_header(out, &wire_name, &joined)?;
            } else {
                for value in values {
                    write_header(out, &wire_name, &value.to_string())?;
                }
            }
        }
        Ok(())
    }

    fn compact(&self) -> bool {
        self.header_form == HeaderForm::Compact
    }
}

fn write_header(out: &mut FixedBuffer, name: &str, value: &str) -> Result<()> {
    out.put_str(name)?;
    out.put(b": ")?;
    out.put_str(value)?;
    out.put(CRLF)
}
