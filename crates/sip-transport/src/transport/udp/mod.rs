mod connection;

pub use connection::UdpConnection;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use siplet_sip_core::Framing;

use crate::error::{Error, Result};
use crate::transport::decoder::{Decoded, MessageDecoder};
use crate::transport::{Connector, EventSender, SipConnection, TransportEvent, TransportKind};

/// Largest datagram accepted on receive
pub const MAX_UDP_SIZE: usize = 65_536;

/// Default bound on generated datagrams
pub const DEFAULT_MTU: usize = 1500;

/// UDP connector: one socket shared by every remote peer
#[derive(Clone)]
pub struct UdpConnector {
    inner: Arc<UdpConnectorInner>,
}

struct UdpConnectorInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    mtu: usize,
    closed: Arc<AtomicBool>,
    shutdown: Notify,
    events_tx: EventSender,
}

impl UdpConnector {
    /// Bind to `addr` and start receiving
    pub async fn bind(addr: SocketAddr, mtu: usize, events_tx: EventSender) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP connector bound to {}", local_addr);

        let connector = UdpConnector {
            inner: Arc::new(UdpConnectorInner {
                socket: Arc::new(socket),
                local_addr,
                mtu,
                closed: Arc::new(AtomicBool::new(false)),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        connector.spawn_receive_loop();
        Ok(connector)
    }

    /// Connection to `remote` over the shared socket
    pub fn connection(&self, remote: SocketAddr) -> UdpConnection {
        UdpConnection::new(
            self.inner.socket.clone(),
            self.inner.local_addr,
            remote,
            self.inner.mtu,
            self.inner.closed.clone(),
        )
    }

    fn spawn_receive_loop(&self) {
        let connector = self.clone();

        tokio::spawn(async move {
            let inner = &connector.inner;
            let mut buf = vec![0u8; MAX_UDP_SIZE];
            let mut decoder = MessageDecoder::new(Framing::Datagram);

            while !inner.closed.load(Ordering::Acquire) {
                let received = tokio::select! {
                    r = inner.socket.recv_from(&mut buf) => r,
                    _ = inner.shutdown.notified() => break,
                };
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Acquire) {
                            break;
                        }
                        // ICMP port unreachable surfaces here on some platforms
                        warn!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error receiving packet: {}", e),
                            })
                            .await;
                        continue;
                    }
                };
                debug!("Received {} bytes from {}", len, src);

                match decoder.decode_datagram(&buf[..len]) {
                    Some(Decoded::Message(message)) => {
                        let connection: Arc<dyn SipConnection> =
                            Arc::new(connector.connection(src));
                        let event = TransportEvent::MessageReceived { message, connection };
                        if inner.events_tx.send(event).await.is_err() {
                            error!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Some(Decoded::Bad(bad)) => {
                        warn!(
                            status = bad.status,
                            reason = %bad.reason,
                            "Bad message from {}",
                            src
                        );
                        if let Some(response) = bad.error_response() {
                            if let Err(e) = connector.connection(src).send_response(&response) {
                                debug!("Could not answer bad message: {}", e);
                            }
                        }
                    }
                    None => {}
                }
            }

            let _ = inner
                .events_tx
                .send(TransportEvent::Closed {
                    transport: TransportKind::Udp,
                    local_addr: inner.local_addr,
                })
                .await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Connector for UdpConnector {
    fn transport(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SipConnection>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        Ok(Arc::new(self.connection(remote)))
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.notify_one();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UdpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpConnector({})", self.inner.local_addr)
    }
}
