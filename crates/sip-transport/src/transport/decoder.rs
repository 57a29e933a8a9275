//! Per-connection message decoding
//!
//! A [`MessageDecoder`] owns the read buffer of one connection together with
//! a [`SipParser`] and a [`MessageBuilder`]. Stream transports append what
//! they read and call [`MessageDecoder::decode`] until it returns `None`;
//! datagram transports decode each datagram on its own.

use bytes::BytesMut;
use tracing::{debug, trace};

use siplet_sip_core::{BadMessage, Framing, MessageBuilder, SipMessage, SipParser};

/// Upper bound on bytes buffered for one message on a stream
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 400 * 1024;

/// Outcome of decoding one message
#[derive(Debug)]
pub enum Decoded {
    Message(SipMessage),
    Bad(BadMessage),
}

/// Framing-aware decoder bound to one connection
#[derive(Debug)]
pub struct MessageDecoder {
    parser: SipParser,
    builder: MessageBuilder,
    buffer: BytesMut,
    max_message_size: usize,
}

impl MessageDecoder {
    pub fn new(framing: Framing) -> Self {
        Self::with_max_message_size(framing, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(framing: Framing, max_message_size: usize) -> Self {
        MessageDecoder {
            parser: SipParser::new().with_max_content_length(max_message_size),
            builder: MessageBuilder::new(framing),
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Read buffer to fill from the socket
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next message out of the buffered bytes, if one is complete.
    ///
    /// Bytes of a following message stay buffered. When more than the
    /// maximum message size is buffered without completing a message, the
    /// buffer is cleared and a `513 Message Too Large` is reported.
    pub fn decode(&mut self) -> Option<Decoded> {
        if self.parser.parse_next(&mut self.buffer, &mut self.builder) {
            return Some(self.finish());
        }
        if self.buffer.len() > self.max_message_size {
            debug!(buffered = self.buffer.len(), "Stream buffer limit exceeded");
            self.buffer.clear();
            self.reset();
            return Some(Decoded::Bad(BadMessage {
                status: 513,
                reason: "Message Too Large".to_string(),
                request: None,
            }));
        }
        trace!(
            buffered = self.buffer.len(),
            state = ?self.parser.state(),
            "Waiting for more bytes"
        );
        None
    }

    /// Decode one self-contained datagram or WebSocket frame.
    ///
    /// Returns `None` for keep-alives (CRLF only).
    pub fn decode_datagram(&mut self, data: &[u8]) -> Option<Decoded> {
        self.reset();
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        let done = self.parser.parse_next(&mut self.buffer, &mut self.builder);
        self.buffer.clear();
        if done {
            return Some(self.finish());
        }
        if self.parser.is_start() {
            trace!("Keep-alive");
            return None;
        }
        self.reset();
        Some(Decoded::Bad(BadMessage {
            status: 400,
            reason: "Incomplete message".to_string(),
            request: None,
        }))
    }

    fn finish(&mut self) -> Decoded {
        let decoded = match (self.builder.take_message(), self.builder.take_bad()) {
            (Some(message), _) => Decoded::Message(message),
            (None, Some(bad)) => Decoded::Bad(bad),
            (None, None) => Decoded::Bad(BadMessage {
                status: 400,
                reason: "Empty message".to_string(),
                request: None,
            }),
        };
        self.reset();
        decoded
    }

    fn reset(&mut self) {
        self.parser.reset();
        self.builder.reset();
    }
}
