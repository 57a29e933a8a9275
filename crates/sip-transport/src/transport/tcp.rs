use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::transport::stream::{spawn_stream_session, Registry, StreamConnection, StreamLimits};
use crate::transport::{Connector, EventSender, SipConnection, TransportEvent, TransportKind};

/// TCP connector: accepts inbound streams and dials outbound ones
#[derive(Clone)]
pub struct TcpConnector {
    inner: Arc<TcpConnectorInner>,
}

struct TcpConnectorInner {
    local_addr: SocketAddr,
    limits: StreamLimits,
    connections: Registry,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: EventSender,
}

impl TcpConnector {
    pub async fn bind(
        addr: SocketAddr,
        limits: StreamLimits,
        events_tx: EventSender,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SIP TCP connector bound to {}", local_addr);

        let connector = TcpConnector {
            inner: Arc::new(TcpConnectorInner {
                local_addr,
                limits,
                connections: Arc::new(DashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        connector.spawn_accept_loop(listener);
        Ok(connector)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let connector = self.clone();
        tokio::spawn(async move {
            let inner = &connector.inner;
            loop {
                let accepted = tokio::select! {
                    r = listener.accept() => r,
                    _ = inner.shutdown.notified() => break,
                };
                match accepted {
                    Ok((stream, remote)) => {
                        debug!("Accepted TCP connection from {}", remote);
                        let _ = stream.set_nodelay(true);
                        spawn_stream_session(
                            stream,
                            TransportKind::Tcp,
                            inner.local_addr,
                            remote,
                            inner.limits,
                            inner.events_tx.clone(),
                            inner.connections.clone(),
                        );
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            let _ = inner
                .events_tx
                .send(TransportEvent::Closed {
                    transport: TransportKind::Tcp,
                    local_addr: inner.local_addr,
                })
                .await;
            info!("TCP accept loop terminated");
        });
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn transport(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SipConnection>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let existing = self.inner.connections.get(&remote).map(|c| c.value().clone());
        if let Some(existing) = existing.filter(|c| c.is_open()) {
            return Ok(existing);
        }
        let stream = TcpStream::connect(remote).await?;
        let _ = stream.set_nodelay(true);
        let local = stream.local_addr()?;
        debug!("Opened TCP connection {} -> {}", local, remote);
        let connection: Arc<StreamConnection> = spawn_stream_session(
            stream,
            TransportKind::Tcp,
            local,
            remote,
            self.inner.limits,
            self.inner.events_tx.clone(),
            self.inner.connections.clone(),
        );
        Ok(connection)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.notify_one();
        for entry in self.inner.connections.iter() {
            entry.value().close();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpConnector({})", self.inner.local_addr)
    }
}
