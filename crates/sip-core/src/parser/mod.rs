//! # Incremental SIP parser
//!
//! [`SipParser`] is a resumable, byte-driven state machine. It is handed a
//! [`BytesMut`] that may hold only part of a message, consumes what it can
//! interpret and reports what it found to a [`ParserHandler`]:
//!
//! ```text
//!  START ─┬─▶ METHOD ──────────┬─▶ SPACE1 ─┬─▶ URI ────▶ SPACE2 ─▶ REQUEST_VERSION ─┐
//!         └─▶ RESPONSE_VERSION ┘           └─▶ STATUS ─▶ SPACE2 ─▶ REASON ──────────┤
//!                                                                                   ▼
//!        ┌──────────────────────────────────────────────────────────────────── HEADER ◀─┐
//!        │ HEADER_NAME ─▶ HEADER_IN_NAME ─▶ HEADER_VALUE ─▶ HEADER_IN_VALUE ────────────┘
//!        ▼
//!   (blank line) ─▶ CONTENT ─▶ END
//! ```
//!
//! ## Resumability
//!
//! A token that is cut off by the end of the buffer is left unconsumed and
//! the parser returns to the state where that token started, so the next
//! call rescans it once more bytes have been appended. A header line is
//! held back until the first byte of the following line shows that it is
//! not continued (a line starting with SP or HT is folded into the previous
//! value with a single space). A CR ending a line sets an `eol` flag that
//! swallows the LF even when it arrives in a later read.
//!
//! ## Fast path
//!
//! At `START` the parser first tries to match a well-known method or
//! `SIP/2.0` as a contiguous byte run and only falls back to the per-byte
//! token scan on a miss.
//!
//! ## Content
//!
//! With a known Content-Length and the whole body already buffered, the
//! body is split off the input as a read-only [`Bytes`] view without
//! copying. Otherwise the parser accumulates into an owned buffer across
//! calls. Without a Content-Length the rest of the buffer is the body,
//! which is the datagram rule; stream consumers must reject such messages
//! in [`ParserHandler::header_complete`].
//!
//! ## Errors
//!
//! Any malformed token moves the parser to `END` and calls
//! [`ParserHandler::bad_message`]. The parser then consumes the input up to
//! and including the end of the current line, so bytes that belong to a
//! following message are left in the buffer. A bad Content-Length is only
//! known once its line (and any folding) is complete; nothing after that
//! line is consumed.

mod builder;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

pub use builder::{BadMessage, Framing, MessageBuilder};

use crate::grammar::{self, COLON, CR, LF, SPACE, TAB};
use crate::types::{HeaderName, Method, Version};

/// Parser states, in transition order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Start,
    Method,
    ResponseVersion,
    Space1,
    Uri,
    Status,
    Space2,
    RequestVersion,
    Reason,
    Header,
    HeaderName,
    HeaderInName,
    HeaderValue,
    HeaderInValue,
    Content,
    End,
}

/// Receiver of parse events.
///
/// Every callback except [`bad_message`](ParserHandler::bad_message) returns
/// `true` to halt the parser, which then moves to [`State::End`].
pub trait ParserHandler {
    fn start_request(&mut self, method: Method, uri: &str, version: Version) -> bool;

    fn start_response(&mut self, version: Version, status: u16, reason: &str) -> bool;

    /// A complete header, continuation lines included
    fn parsed_header(&mut self, name: HeaderName, value: &str) -> bool;

    fn header_complete(&mut self) -> bool;

    fn message_complete(&mut self, content: Bytes) -> bool;

    fn bad_message(&mut self, status: u16, reason: &str);
}

/// Resumable SIP message parser
#[derive(Debug)]
pub struct SipParser {
    state: State,
    eol: bool,
    response: bool,
    method: Option<Method>,
    uri: String,
    status: u16,
    pending: Option<(HeaderName, String)>,
    content_length: Option<usize>,
    max_content_length: Option<usize>,
    content: BytesMut,
}

impl Default for SipParser {
    fn default() -> Self {
        SipParser::new()
    }
}

/// Outcome of a line-level step
enum Step {
    /// Keep going from the given offset
    Continue(usize),
    /// Stop and consume up to the given offset
    Stop(usize),
}

fn is_ws(b: u8) -> bool {
    b == SPACE || b == TAB
}

fn is_eol(b: u8) -> bool {
    b == CR || b == LF
}

fn find(buf: &[u8], from: usize, pred: impl Fn(u8) -> bool) -> Option<usize> {
    buf[from..].iter().position(|b| pred(*b)).map(|i| from + i)
}

impl SipParser {
    pub fn new() -> Self {
        SipParser {
            state: State::Start,
            eol: false,
            response: false,
            method: None,
            uri: String::new(),
            status: 0,
            pending: None,
            content_length: None,
            max_content_length: None,
            content: BytesMut::new(),
        }
    }

    /// Reject bodies larger than `limit` with `513 Message Too Large`
    pub fn with_max_content_length(mut self, limit: usize) -> Self {
        self.max_content_length = Some(limit);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_start(&self) -> bool {
        self.state == State::Start
    }

    pub fn is_end(&self) -> bool {
        self.state == State::End
    }

    /// Content-Length of the message being parsed, once its header was seen
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Forget the current message and return to [`State::Start`]
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.response = false;
        self.method = None;
        self.uri.clear();
        self.status = 0;
        self.pending = None;
        self.content_length = None;
        self.content = BytesMut::new();
    }

    /// Parse as far as `buf` allows.
    ///
    /// Consumed bytes are removed from `buf`. Returns `true` once the current
    /// message is finished, either complete or rejected; call [`reset`]
    /// before parsing the next one.
    ///
    /// [`reset`]: SipParser::reset
    pub fn parse_next<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> bool {
        if self.state < State::Content {
            let consumed = self.parse_lines(&buf[..], handler);
            buf.advance(consumed);
        }
        if self.state == State::Content {
            self.parse_content(buf, handler);
        }
        self.state == State::End
    }

    fn parse_lines<H: ParserHandler + ?Sized>(&mut self, buf: &[u8], handler: &mut H) -> usize {
        let mut pos = 0;
        while pos < buf.len() && self.state < State::Content {
            if self.eol {
                self.eol = false;
                if buf[pos] == LF {
                    pos += 1;
                    continue;
                }
            }
            let step = match self.state {
                State::Start => self.on_start(buf, pos, handler),
                State::Method => self.on_method(buf, pos, handler),
                State::ResponseVersion => self.on_response_version(buf, pos, handler),
                State::Space1 => self.on_space1(buf, pos, handler),
                State::Uri => self.on_uri(buf, pos, handler),
                State::Status => self.on_status(buf, pos, handler),
                State::Space2 => self.on_space2(buf, pos, handler),
                State::RequestVersion => self.on_request_version(buf, pos, handler),
                State::Reason => self.on_reason(buf, pos, handler),
                State::Header => self.on_header(buf, pos, handler),
                _ => self.on_header_line(buf, pos, handler),
            };
            match step {
                Step::Continue(next) => pos = next,
                Step::Stop(next) => return next,
            }
        }
        pos
    }

    fn on_start<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let b = buf[pos];
        if is_eol(b) {
            // keep-alive CRLFs between messages
            return Step::Continue(pos + 1);
        }
        let rest = &buf[pos..];
        if let Some(method) = Method::look_ahead(rest) {
            let next = pos + method.as_str().len();
            self.method = Some(method);
            self.state = State::Space1;
            return Step::Continue(next);
        }
        if Version::look_ahead(rest).is_some() {
            self.response = true;
            self.state = State::Space1;
            return Step::Continue(pos + Version::Sip20.as_bytes().len());
        }
        if rest.starts_with(b"SIP/") || b"SIP/".starts_with(rest) {
            self.state = State::ResponseVersion;
            Step::Continue(pos)
        } else if grammar::TOKEN.contains(b) {
            self.state = State::Method;
            Step::Continue(pos)
        } else {
            self.bad(buf, pos, 400, "Illegal character", handler)
        }
    }

    fn on_method<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, |b| is_ws(b) || is_eol(b)) {
            Some(end) => end,
            None => return self.rewind(State::Start, pos),
        };
        let token = &buf[pos..end];
        if !grammar::is_token_bytes(token) {
            return self.bad(buf, pos, 400, "Bad method", handler);
        }
        if buf[end] != SPACE {
            return self.bad(buf, pos, 400, "Bad request line", handler);
        }
        self.method = Some(Method::from_bytes(token));
        self.state = State::Space1;
        Step::Continue(end)
    }

    fn on_response_version<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, |b| is_ws(b) || is_eol(b)) {
            Some(end) => end,
            None => return self.rewind(State::Start, pos),
        };
        if Version::from_bytes(&buf[pos..end]).is_none() {
            return self.bad(buf, pos, 505, "Unknown Version", handler);
        }
        if is_eol(buf[end]) {
            return self.bad(buf, pos, 400, "Bad status", handler);
        }
        self.response = true;
        self.state = State::Space1;
        Step::Continue(end)
    }

    fn on_space1<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let b = buf[pos];
        if is_ws(b) {
            return Step::Continue(pos + 1);
        }
        if is_eol(b) {
            let reason = if self.response { "Bad status" } else { "No URI" };
            return self.bad(buf, pos, 400, reason, handler);
        }
        self.state = if self.response { State::Status } else { State::Uri };
        Step::Continue(pos)
    }

    fn on_uri<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, |b| is_ws(b) || is_eol(b)) {
            Some(end) => end,
            None => return self.rewind(State::Uri, pos),
        };
        if is_eol(buf[end]) {
            return self.bad(buf, pos, 400, "Bad request line", handler);
        }
        match std::str::from_utf8(&buf[pos..end]) {
            Ok(uri) => {
                self.uri.clear();
                self.uri.push_str(uri);
            }
            Err(_) => return self.bad(buf, pos, 400, "Bad URI", handler),
        }
        self.state = State::Space2;
        Step::Continue(end)
    }

    fn on_status<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, |b| is_ws(b) || is_eol(b)) {
            Some(end) => end,
            None => return self.rewind(State::Status, pos),
        };
        let digits = &buf[pos..end];
        let status = if digits.len() == 3 && digits.iter().all(|b| grammar::DIGITS.contains(*b)) {
            digits.iter().fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'))
        } else {
            0
        };
        if !(100..700).contains(&status) {
            return self.bad(buf, pos, 400, "Bad status", handler);
        }
        self.status = status;
        if is_eol(buf[end]) {
            // status line without a reason phrase
            self.eol = buf[end] == CR;
            self.state = State::Header;
            return self.started(end + 1, handler.start_response(Version::Sip20, status, ""));
        }
        self.state = State::Space2;
        Step::Continue(end)
    }

    fn on_space2<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let b = buf[pos];
        if is_ws(b) {
            return Step::Continue(pos + 1);
        }
        if self.response {
            self.state = State::Reason;
        } else if is_eol(b) {
            return self.bad(buf, pos, 400, "Bad request line", handler);
        } else {
            self.state = State::RequestVersion;
        }
        Step::Continue(pos)
    }

    fn on_request_version<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, is_eol) {
            Some(end) => end,
            None => return self.rewind(State::RequestVersion, pos),
        };
        let mut token = &buf[pos..end];
        while let [rest @ .., last] = token {
            if !is_ws(*last) {
                break;
            }
            token = rest;
        }
        let version = match Version::from_bytes(token) {
            Some(version) => version,
            None => return self.bad(buf, pos, 505, "Unknown Version", handler),
        };
        let method = match self.method.take() {
            Some(method) => method,
            None => return self.bad(buf, pos, 400, "Bad request line", handler),
        };
        self.eol = buf[end] == CR;
        self.state = State::Header;
        let halt = handler.start_request(method, &self.uri, version);
        self.started(end + 1, halt)
    }

    fn on_reason<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let end = match find(buf, pos, is_eol) {
            Some(end) => end,
            None => return self.rewind(State::Reason, pos),
        };
        let reason = String::from_utf8_lossy(&buf[pos..end]);
        self.eol = buf[end] == CR;
        self.state = State::Header;
        let halt = handler.start_response(Version::Sip20, self.status, reason.trim());
        self.started(end + 1, halt)
    }

    fn started(&mut self, next: usize, halt: bool) -> Step {
        if halt {
            self.state = State::End;
            Step::Stop(next)
        } else {
            Step::Continue(next)
        }
    }

    /// First byte of a header-section line
    fn on_header<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let b = buf[pos];

        if is_ws(b) {
            // continuation of the pending header
            let end = match find(buf, pos, is_eol) {
                Some(end) => end,
                None => return self.rewind(State::Header, pos),
            };
            let segment = String::from_utf8_lossy(&buf[pos..end]);
            match self.pending.as_mut() {
                Some((_, value)) => {
                    let segment = segment.trim();
                    if !segment.is_empty() {
                        if !value.is_empty() {
                            value.push(' ');
                        }
                        value.push_str(segment);
                    }
                }
                None => return self.bad(buf, pos, 400, "Bad continuation", handler),
            }
            self.eol = buf[end] == CR;
            return Step::Continue(end + 1);
        }

        if let Err(step) = self.flush_header(pos, handler) {
            return step;
        }

        if !is_eol(b) {
            self.state = State::HeaderName;
            return Step::Continue(pos);
        }

        // blank line: end of headers
        self.eol = b == CR;
        let next = pos + 1;
        if handler.header_complete() {
            self.state = State::End;
            return Step::Stop(next);
        }
        if self.content_length == Some(0) {
            self.state = State::End;
            handler.message_complete(Bytes::new());
            return Step::Stop(next);
        }
        self.state = State::Content;
        Step::Stop(next)
    }

    /// Scan one `name: value` line through the header sub-states
    fn on_header_line<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        handler: &mut H,
    ) -> Step {
        let mut state = State::HeaderName;
        let mut name_end = pos;
        let mut value_start = pos;
        let mut value_end = pos;
        let mut i = pos;

        while i < buf.len() && !is_eol(buf[i]) {
            let c = buf[i];
            match state {
                State::HeaderName => {
                    if c == COLON {
                        name_end = i;
                        state = State::HeaderValue;
                    } else if is_ws(c) {
                        name_end = i;
                        state = State::HeaderInName;
                    } else if !grammar::TOKEN.contains(c) {
                        return self.bad(buf, pos, 400, "Bad header name", handler);
                    }
                }
                State::HeaderInName => {
                    if c == COLON {
                        state = State::HeaderValue;
                    } else if !is_ws(c) {
                        return self.bad(buf, pos, 400, "Missing colon", handler);
                    }
                }
                State::HeaderValue => {
                    if !is_ws(c) {
                        value_start = i;
                        value_end = i + 1;
                        state = State::HeaderInValue;
                    }
                }
                _ => {
                    if !is_ws(c) {
                        value_end = i + 1;
                    }
                }
            }
            i += 1;
        }

        if i == buf.len() {
            return self.rewind(State::Header, pos);
        }
        if matches!(state, State::HeaderName | State::HeaderInName) {
            return self.bad(buf, pos, 400, "Missing colon", handler);
        }
        if name_end == pos {
            return self.bad(buf, pos, 400, "Bad header name", handler);
        }

        let name = HeaderName::from_bytes(&buf[pos..name_end]);
        let value = String::from_utf8_lossy(&buf[value_start..value_end]).into_owned();
        self.pending = Some((name, value));
        self.eol = buf[i] == CR;
        self.state = State::Header;
        Step::Continue(i + 1)
    }

    /// Emit the pending header now that it cannot be continued.
    ///
    /// `pos` is the start of the following line; the pending header's own
    /// line is already consumed.
    fn flush_header<H: ParserHandler + ?Sized>(
        &mut self,
        pos: usize,
        handler: &mut H,
    ) -> Result<(), Step> {
        let (name, value) = match self.pending.take() {
            Some(pending) => pending,
            None => return Ok(()),
        };
        if name == HeaderName::ContentLength {
            let length = match value.trim().parse::<usize>() {
                Ok(length) => length,
                Err(_) => return Err(self.reject(pos, 400, "Bad Content-Length", handler)),
            };
            if self.max_content_length.is_some_and(|max| length > max) {
                return Err(self.reject(pos, 513, "Message Too Large", handler));
            }
            self.content_length = Some(length);
        }
        if handler.parsed_header(name, &value) {
            self.state = State::End;
            return Err(Step::Stop(pos));
        }
        Ok(())
    }

    fn parse_content<H: ParserHandler + ?Sized>(&mut self, buf: &mut BytesMut, handler: &mut H) {
        if self.eol {
            match buf.first() {
                Some(&b) => {
                    self.eol = false;
                    if b == LF {
                        buf.advance(1);
                    }
                }
                // the LF of the blank line may still be on its way
                None if self.content_length.is_some() => return,
                None => self.eol = false,
            }
        }

        let length = match self.content_length {
            Some(length) => length,
            None => {
                let content = buf.split().freeze();
                self.complete(content, handler);
                return;
            }
        };

        if self.content.is_empty() && buf.len() >= length {
            let content = buf.split_to(length).freeze();
            self.complete(content, handler);
            return;
        }

        let take = (length - self.content.len()).min(buf.len());
        self.content.extend_from_slice(&buf[..take]);
        buf.advance(take);
        trace!(received = self.content.len(), length, "Accumulating content");
        if self.content.len() == length {
            let content = std::mem::take(&mut self.content).freeze();
            self.complete(content, handler);
        }
    }

    fn complete<H: ParserHandler + ?Sized>(&mut self, content: Bytes, handler: &mut H) {
        self.state = State::End;
        handler.message_complete(content);
    }

    fn rewind(&mut self, state: State, pos: usize) -> Step {
        self.state = state;
        Step::Stop(pos)
    }

    /// Report a bad message without consuming anything past `pos`
    fn reject<H: ParserHandler + ?Sized>(
        &mut self,
        pos: usize,
        status: u16,
        reason: &str,
        handler: &mut H,
    ) -> Step {
        self.state = State::End;
        self.pending = None;
        handler.bad_message(status, reason);
        Step::Stop(pos)
    }

    /// Report a bad message and consume through the end of the current line
    fn bad<H: ParserHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        pos: usize,
        status: u16,
        reason: &str,
        handler: &mut H,
    ) -> Step {
        self.state = State::End;
        self.pending = None;
        handler.bad_message(status, reason);
        let consumed = match find(buf, pos, is_eol) {
            Some(end) if buf[end] == CR => {
                self.eol = true;
                end + 1
            }
            Some(end) => end + 1,
            None => buf.len(),
        };
        Step::Stop(consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        content: Option<Bytes>,
    }

    impl ParserHandler for Recorder {
        fn start_request(&mut self, method: Method, uri: &str, version: Version) -> bool {
            self.events.push(format!("request {} {} {}", method, uri, version));
            false
        }

        fn start_response(&mut self, version: Version, status: u16, reason: &str) -> bool {
            self.events.push(format!("response {} {} {}", version, status, reason));
            false
        }

        fn parsed_header(&mut self, name: HeaderName, value: &str) -> bool {
            self.events.push(format!("{}: {}", name, value));
            false
        }

        fn header_complete(&mut self) -> bool {
            self.events.push("headers done".to_string());
            false
        }

        fn message_complete(&mut self, content: Bytes) -> bool {
            self.events.push(format!("complete {}", content.len()));
            self.content = Some(content);
            false
        }

        fn bad_message(&mut self, status: u16, reason: &str) {
            self.events.push(format!("bad {} {}", status, reason));
        }
    }

    const OPTIONS: &[u8] = b"OPTIONS sip:bob@biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8ass877\r\n\
        Call-ID: a84b4c76e66710\r\n\
        CSeq: 63104 OPTIONS\r\n\
        Content-Length: 0\r\n\r\n";

    fn parse(bytes: &[u8]) -> (Recorder, BytesMut, bool) {
        let mut buf = BytesMut::from(bytes);
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        let done = parser.parse_next(&mut buf, &mut recorder);
        (recorder, buf, done)
    }

    #[test]
    fn test_request() {
        let (r, buf, done) = parse(OPTIONS);
        assert!(done);
        assert!(buf.is_empty());
        assert_eq!(
            r.events,
            [
                "request OPTIONS sip:bob@biloxi.com SIP/2.0",
                "Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bKhjhs8ass877",
                "Call-ID: a84b4c76e66710",
                "CSeq: 63104 OPTIONS",
                "Content-Length: 0",
                "headers done",
                "complete 0",
            ]
        );
    }

    #[test]
    fn test_response_with_multi_word_reason() {
        let (r, _, done) = parse(b"SIP/2.0 481 Call/Transaction Does Not Exist\r\nl: 0\r\n\r\n");
        assert!(done);
        assert_eq!(r.events[0], "response SIP/2.0 481 Call/Transaction Does Not Exist");
        assert_eq!(r.events[1], "Content-Length: 0");
    }

    #[test]
    fn test_extension_method_and_bare_lf() {
        let (r, _, done) = parse(b"FOO sip:x SIP/2.0\nContent-Length: 0\n\n");
        assert!(done);
        assert_eq!(r.events[0], "request FOO sip:x SIP/2.0");
        assert_eq!(r.events.last().map(String::as_str), Some("complete 0"));
    }

    #[test]
    fn test_folded_header() {
        let (r, _, _) = parse(
            b"MESSAGE sip:x SIP/2.0\r\nSubject: I know you're there,\r\n   pick up the phone\r\n\
              \tand talk to me!\r\nl: 0\r\n\r\n",
        );
        assert_eq!(
            r.events[1],
            "Subject: I know you're there, pick up the phone and talk to me!"
        );
    }

    #[test]
    fn test_header_name_whitespace_before_colon() {
        let (r, _, _) = parse(b"BYE sip:x SIP/2.0\r\nCall-ID   :   abc  \r\nl:0\r\n\r\n");
        assert_eq!(r.events[1], "Call-ID: abc");
    }

    #[test]
    fn test_crlf_split_across_reads() {
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        let mut buf = BytesMut::new();
        let split = OPTIONS.iter().position(|b| *b == b'\r').unwrap() + 1;
        buf.extend_from_slice(&OPTIONS[..split]);
        assert!(!parser.parse_next(&mut buf, &mut recorder));
        buf.extend_from_slice(&OPTIONS[split..]);
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(recorder.events.len(), 7);
    }

    #[test]
    fn test_incomplete_token_is_not_consumed() {
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        let mut buf = BytesMut::from(&b"OPTIONS sip:bob@bil"[..]);
        assert!(!parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(&buf[..], b"sip:bob@bil");
        assert_eq!(parser.state(), State::Uri);
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_zero_copy_content() {
        let message = b"MESSAGE sip:x SIP/2.0\r\nContent-Length: 5\r\n\r\nhello";
        let mut buf = BytesMut::from(&message[..]);
        let body_ptr = buf[message.len() - 5..].as_ptr();
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut recorder));
        let content = recorder.content.unwrap();
        assert_eq!(&content[..], b"hello");
        assert_eq!(content.as_ptr(), body_ptr);
    }

    #[test]
    fn test_content_accumulates_across_reads() {
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        let mut buf =
            BytesMut::from(&b"MESSAGE sip:x SIP/2.0\r\nContent-Length: 10\r\n\r\nhel"[..]);
        assert!(!parser.parse_next(&mut buf, &mut recorder));
        assert!(buf.is_empty());
        buf.extend_from_slice(b"lo wo");
        assert!(!parser.parse_next(&mut buf, &mut recorder));
        buf.extend_from_slice(b"rldNEXT");
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(&recorder.content.unwrap()[..], b"hello worl");
        assert_eq!(&buf[..], b"dNEXT");
    }

    #[test]
    fn test_missing_content_length_takes_rest() {
        let (r, buf, done) = parse(b"MESSAGE sip:x SIP/2.0\r\nCall-ID: 1\r\n\r\nbody bytes");
        assert!(done);
        assert!(buf.is_empty());
        assert_eq!(&r.content.unwrap()[..], b"body bytes");
    }

    #[test]
    fn test_garbage_consumes_only_its_line() {
        let mut input = b"\x00\x01\xffgarbage\r\n".to_vec();
        input.extend_from_slice(OPTIONS);
        let mut buf = BytesMut::from(&input[..]);
        let mut parser = SipParser::new();
        let mut recorder = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(parser.state(), State::End);
        assert_eq!(recorder.events, ["bad 400 Illegal character"]);

        parser.reset();
        let mut recorder = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(recorder.events[0], "request OPTIONS sip:bob@biloxi.com SIP/2.0");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_messages() {
        let cases: &[(&[u8], &str)] = &[
            (b"INVITE\r\n\r\n", "bad 400 Bad request line"),
            (b"INVITE \r\n\r\n", "bad 400 No URI"),
            (b"INVITE sip:x SIP/3.0\r\n\r\n", "bad 505 Unknown Version"),
            (b"SIP/1.0 200 OK\r\n\r\n", "bad 505 Unknown Version"),
            (b"SIP/2.0 2000 OK\r\n\r\n", "bad 400 Bad status"),
            (b"SIP/2.0 099 Low\r\n\r\n", "bad 400 Bad status"),
            (b"BYE sip:x SIP/2.0\r\nContent-Length: ten\r\n\r\n", "bad 400 Bad Content-Length"),
            (b"BYE sip:x SIP/2.0\r\nNoColonHere\r\n\r\n", "bad 400 Missing colon"),
            (b"BYE sip:x SIP/2.0\r\n  folded\r\n\r\n", "bad 400 Bad continuation"),
        ];
        for (input, expected) in cases {
            let (r, _, done) = parse(input);
            assert!(done, "{:?}", String::from_utf8_lossy(input));
            assert_eq!(r.events.last().map(String::as_str), Some(*expected));
        }
    }

    #[test]
    fn test_content_length_limit() {
        let mut parser = SipParser::new().with_max_content_length(100);
        let mut recorder = Recorder::default();
        let mut buf = BytesMut::from(&b"MESSAGE sip:x SIP/2.0\r\nContent-Length: 1000\r\n\r\n"[..]);
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(recorder.events.last().unwrap(), "bad 513 Message Too Large");
    }

    #[test]
    fn test_bad_content_length_leaves_next_line() {
        let mut input = b"BYE sip:x SIP/2.0\r\nContent-Length: ten\r\n".to_vec();
        input.extend_from_slice(OPTIONS);
        let (r, buf, done) = parse(&input);
        assert!(done);
        assert_eq!(r.events.last().unwrap(), "bad 400 Bad Content-Length");
        assert_eq!(&buf[..], OPTIONS);

        let oversized = b"BYE sip:x SIP/2.0\r\nContent-Length: 1000\r\nCall-ID: abc\r\n";
        let mut buf = BytesMut::from(&oversized[..]);
        let mut parser = SipParser::new().with_max_content_length(100);
        let mut recorder = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(recorder.events.last().unwrap(), "bad 513 Message Too Large");
        assert_eq!(&buf[..], b"Call-ID: abc\r\n");

        parser.reset();
        let mut buf = BytesMut::from(OPTIONS);
        let mut recorder = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut recorder));
        assert_eq!(recorder.events[0], "request OPTIONS sip:bob@biloxi.com SIP/2.0");
    }

    #[test]
    fn test_reset_between_pipelined_messages() {
        let mut input = OPTIONS.to_vec();
        input.extend_from_slice(b"SIP/2.0 200 OK\r\nContent-Length: 2\r\n\r\nok");
        let mut buf = BytesMut::from(&input[..]);
        let mut parser = SipParser::new();

        let mut first = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut first));
        parser.reset();
        let mut second = Recorder::default();
        assert!(parser.parse_next(&mut buf, &mut second));

        assert_eq!(first.events.len(), 7);
        assert_eq!(second.events[0], "response SIP/2.0 200 OK");
        assert_eq!(&second.content.unwrap()[..], b"ok");
    }
}
