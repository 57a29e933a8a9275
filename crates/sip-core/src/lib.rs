//! # siplet-sip-core
//!
//! Wire-level SIP for the siplet stack: the byte grammar, the structured
//! message model, an incremental resumable parser and a generator that writes
//! into fixed-capacity buffers.
//!
//! ## Layout
//!
//! ```text
//!  bytes ──▶ SipParser ──(ParserHandler events)──▶ MessageBuilder ──▶ SipMessage
//!                                                                      │
//!  bytes ◀── Generator ◀──────────── Fields / Request / Response ◀─────┘
//! ```
//!
//! - [`grammar`]: character classes, token tests and a small string scanner.
//! - [`types`]: methods, versions, status codes, header names, URIs,
//!   addresses, Via, CSeq and the ordered [`Fields`](types::Fields) multi-map.
//! - [`message`]: [`Request`], [`Response`] and [`SipMessage`], with
//!   system-header protection and the commit lifecycle.
//! - [`parser`]: the [`SipParser`] state machine and the [`MessageBuilder`]
//!   handler.
//! - [`generator`]: the [`Generator`] and its prepared status-line table.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use siplet_sip_core::{Framing, HeaderAccess, MessageBuilder, SipParser};
//!
//! let mut buffer = BytesMut::from(
//!     &b"OPTIONS sip:bob@example.com SIP/2.0\r\n\
//!        Via: SIP/2.0/UDP host.example.com;branch=z9hG4bK776asdhds\r\n\
//!        From: <sip:alice@example.com>;tag=88sja8x\r\n\
//!        To: <sip:bob@example.com>\r\n\
//!        Call-ID: a84b4c76e66710\r\n\
//!        CSeq: 63104 OPTIONS\r\n\
//!        Content-Length: 0\r\n\r\n"[..],
//! );
//! let mut parser = SipParser::new();
//! let mut builder = MessageBuilder::new(Framing::Stream);
//! assert!(parser.parse_next(&mut buffer, &mut builder));
//! let message = builder.take_message().unwrap();
//! assert_eq!(message.call_id(), Some("a84b4c76e66710"));
//! ```

pub mod error;
pub mod generator;
pub mod grammar;
pub mod message;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use generator::{FixedBuffer, Generator, HeaderForm};
pub use message::{HeaderAccess, Request, Response, SipMessage};
pub use parser::{BadMessage, Framing, MessageBuilder, ParserHandler, SipParser, State};
pub use types::{
    Address, CSeq, Fields, HeaderKind, HeaderName, HeaderValue, Method, Parameterable, Parameters,
    SipUri, StatusCode, Uri, Version, Via,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Address, CSeq, Error, Fields, Framing, Generator, HeaderAccess, HeaderName, HeaderValue,
        MessageBuilder, Method, Request, Response, Result, SipMessage, SipParser, SipUri,
        StatusCode, Uri, Version, Via,
    };
}
