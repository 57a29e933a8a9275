//! Connection abstraction shared by every transport
//!
//! The transaction layer only ever sees [`SipConnection`] trait objects. A
//! connection generates messages into a [`FixedBuffer`] sized by
//! [`SipConnection::max_message_size`] and hands the bytes to its transport
//! without blocking: UDP uses `try_send_to`, stream transports queue the
//! bytes for a per-connection writer task.

pub mod decoder;
#[cfg(feature = "tcp")]
pub mod stream;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
#[cfg(feature = "udp")]
pub mod udp;
#[cfg(feature = "ws")]
pub mod ws;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use siplet_sip_core::{FixedBuffer, Generator, Request, Response, SipMessage};

use crate::error::Result;

/// Transport protocol of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportKind {
    /// Value used in the Via sent-protocol
    pub fn via_transport(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Ws => "WS",
        }
    }

    /// Parse a Via or URI transport token, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            "tls" => Some(TransportKind::Tls),
            "ws" => Some(TransportKind::Ws),
            _ => None,
        }
    }

    /// Reliable transports need no retransmissions
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, TransportKind::Tls)
    }

    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Tls => 5061,
            TransportKind::Ws => 80,
            _ => 5060,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.via_transport())
    }
}

/// One path to a peer
pub trait SipConnection: Send + Sync + fmt::Debug {
    fn transport(&self) -> TransportKind;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    fn is_open(&self) -> bool;

    /// Largest message this connection will emit
    fn max_message_size(&self) -> usize;

    /// Hand raw bytes to the transport without blocking
    fn write(&self, bytes: Bytes) -> Result<()>;

    /// Generate and write a message.
    ///
    /// A message larger than [`max_message_size`](SipConnection::max_message_size)
    /// fails with a `MessageTooLong` error and nothing is written.
    fn send(&self, message: &SipMessage) -> Result<()> {
        let mut buffer = FixedBuffer::new(self.max_message_size());
        Generator::new().generate(message, &mut buffer)?;
        self.write(buffer.freeze())
    }

    fn send_request(&self, request: &Request) -> Result<()> {
        let mut buffer = FixedBuffer::new(self.max_message_size());
        Generator::new().generate_request(request, &mut buffer)?;
        self.write(buffer.freeze())
    }

    fn send_response(&self, response: &Response) -> Result<()> {
        let mut buffer = FixedBuffer::new(self.max_message_size());
        Generator::new().generate_response(response, &mut buffer)?;
        self.write(buffer.freeze())
    }
}

/// A bound listener that can also open outbound connections
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    fn transport(&self) -> TransportKind;

    fn local_addr(&self) -> SocketAddr;

    /// Connection to `remote`, reusing an open one where the transport allows
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SipConnection>>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Events emitted by connectors
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete, well-formed message arrived on `connection`
    MessageReceived {
        message: SipMessage,
        connection: Arc<dyn SipConnection>,
    },

    /// Error that did not stop the connector
    Error { error: String },

    /// The connector stopped receiving
    Closed {
        transport: TransportKind,
        local_addr: SocketAddr,
    },
}

/// Sending half of the event channel handed to connectors
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Default capacity of the event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Create an event channel with the default capacity
pub fn event_channel() -> (EventSender, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(DEFAULT_CHANNEL_CAPACITY)
}
