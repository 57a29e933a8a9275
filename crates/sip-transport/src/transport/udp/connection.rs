use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::transport::{SipConnection, TransportKind};

/// A remote peer reached through the connector's socket
#[derive(Clone)]
pub struct UdpConnection {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    remote: SocketAddr,
    mtu: usize,
    closed: Arc<AtomicBool>,
}

impl UdpConnection {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        local: SocketAddr,
        remote: SocketAddr,
        mtu: usize,
        closed: Arc<AtomicBool>,
    ) -> Self {
        UdpConnection {
            socket,
            local,
            remote,
            mtu,
            closed,
        }
    }
}

impl SipConnection for UdpConnection {
    fn transport(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn max_message_size(&self) -> usize {
        self.mtu
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::TransportClosed);
        }
        match self.socket.try_send_to(&bytes, self.remote) {
            Ok(_) => {
                trace!("Sent {} bytes to {}", bytes.len(), self.remote);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // socket buffer full: finish the send on the runtime
                let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::Io(e))?;
                let socket = self.socket.clone();
                let remote = self.remote;
                handle.spawn(async move {
                    if let Err(e) = socket.send_to(&bytes, remote).await {
                        warn!("Error sending UDP packet to {}: {}", remote, e);
                    }
                });
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpConnection({} -> {})", self.local, self.remote)
    }
}
