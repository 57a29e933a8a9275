//! SIP transport layer for the siplet stack
//!
//! Connectors bind a listening endpoint (UDP, TCP, TLS or WebSocket),
//! decode inbound bytes with the incremental parser and report each
//! message as a [`TransportEvent`] together with the [`SipConnection`] it
//! arrived on. Replies are written back through that connection.

pub mod error;
pub mod transport;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use transport::decoder::{Decoded, MessageDecoder, DEFAULT_MAX_MESSAGE_SIZE};
pub use transport::{
    event_channel, Connector, EventSender, SipConnection, TransportEvent, TransportKind,
    DEFAULT_CHANNEL_CAPACITY,
};

#[cfg(feature = "tcp")]
pub use transport::stream::{StreamConnection, StreamLimits};
#[cfg(feature = "tcp")]
pub use transport::tcp::TcpConnector;
#[cfg(feature = "tls")]
pub use transport::tls::{load_server_config, TlsConnector};
#[cfg(feature = "udp")]
pub use transport::udp::{UdpConnection, UdpConnector, DEFAULT_MTU};
#[cfg(feature = "ws")]
pub use transport::ws::WsConnector;

use std::net::SocketAddr;

use tokio::sync::mpsc;

/// Bind a UDP connector with the default MTU and its own event channel
#[cfg(feature = "udp")]
pub async fn bind_udp(addr: SocketAddr) -> Result<(UdpConnector, mpsc::Receiver<TransportEvent>)> {
    let (tx, rx) = event_channel();
    let connector = UdpConnector::bind(addr, DEFAULT_MTU, tx).await?;
    Ok((connector, rx))
}

/// Bind a TCP connector with default limits and its own event channel
#[cfg(feature = "tcp")]
pub async fn bind_tcp(addr: SocketAddr) -> Result<(TcpConnector, mpsc::Receiver<TransportEvent>)> {
    let (tx, rx) = event_channel();
    let connector = TcpConnector::bind(addr, StreamLimits::default(), tx).await?;
    Ok((connector, rx))
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        event_channel, Connector, Error, Result, SipConnection, TransportEvent, TransportKind,
    };

    #[cfg(feature = "tcp")]
    pub use crate::{bind_tcp, StreamLimits, TcpConnector};
    #[cfg(feature = "tls")]
    pub use crate::TlsConnector;
    #[cfg(feature = "udp")]
    pub use crate::{bind_udp, UdpConnector};
    #[cfg(feature = "ws")]
    pub use crate::WsConnector;
}
