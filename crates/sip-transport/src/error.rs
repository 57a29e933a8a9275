use std::io;

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SIP transport layer
#[derive(Error, Debug)]
pub enum Error {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message could not be generated, including the overflow signal
    #[error("SIP error: {0}")]
    Sip(#[from] siplet_sip_core::Error),

    /// The connection or connector has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The event receiver has gone away
    #[error("Event channel closed")]
    ChannelClosed,
}

impl Error {
    /// True when a message did not fit the connection's size limit
    pub fn is_message_too_long(&self) -> bool {
        matches!(self, Error::Sip(e) if e.is_message_too_long())
    }
}
