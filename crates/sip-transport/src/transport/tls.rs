//! TLS connector on top of the shared stream sessions
//!
//! Certificates are not managed here: the caller supplies a
//! `rustls::ServerConfig` (see [`load_server_config`]) and, for outbound
//! connections, a `rustls::ClientConfig`.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector as RustlsConnector};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::stream::{spawn_stream_session, Registry, StreamConnection, StreamLimits};
use crate::transport::{Connector, EventSender, SipConnection, TransportEvent, TransportKind};

/// Load a server configuration from PEM certificate chain and key files
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<ServerConfig>> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let mut reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();
    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {}", cert_path.display())));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;
    if keys.is_empty() {
        let mut reader = BufReader::new(File::open(key_path)?);
        keys = rustls_pemfile::rsa_private_keys(&mut reader)?;
    }
    let key = keys
        .into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", key_path.display())))?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(Arc::new(config))
}

/// TLS connector
#[derive(Clone)]
pub struct TlsConnector {
    inner: Arc<TlsConnectorInner>,
}

struct TlsConnectorInner {
    local_addr: SocketAddr,
    limits: StreamLimits,
    client_config: Option<Arc<ClientConfig>>,
    connections: Registry,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: EventSender,
}

impl TlsConnector {
    /// Bind and accept TLS streams. Outbound connections need `client_config`.
    pub async fn bind(
        addr: SocketAddr,
        server_config: Arc<ServerConfig>,
        client_config: Option<Arc<ClientConfig>>,
        limits: StreamLimits,
        events_tx: EventSender,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SIP TLS connector bound to {}", local_addr);

        let connector = TlsConnector {
            inner: Arc::new(TlsConnectorInner {
                local_addr,
                limits,
                client_config,
                connections: Arc::new(DashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        connector.spawn_accept_loop(listener, TlsAcceptor::from(server_config));
        Ok(connector)
    }

    /// Dial `remote`, verifying its certificate against `server_name`
    pub async fn connect_with_name(
        &self,
        remote: SocketAddr,
        server_name: &str,
    ) -> Result<Arc<dyn SipConnection>> {
        let name = ServerName::try_from(server_name)
            .map_err(|_| Error::Tls(format!("Invalid server name {}", server_name)))?;
        self.dial(remote, name).await
    }

    async fn dial(&self, remote: SocketAddr, name: ServerName) -> Result<Arc<dyn SipConnection>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let config = self
            .inner
            .client_config
            .clone()
            .ok_or_else(|| Error::Tls("No client configuration for outbound TLS".to_string()))?;
        let existing = self.inner.connections.get(&remote).map(|c| c.value().clone());
        if let Some(existing) = existing.filter(|c| c.is_open()) {
            return Ok(existing);
        }

        let stream = TcpStream::connect(remote).await?;
        let local = stream.local_addr()?;
        let tls_stream = RustlsConnector::from(config)
            .connect(name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        debug!("Opened TLS connection {} -> {}", local, remote);
        let connection: Arc<StreamConnection> = spawn_stream_session(
            tls_stream,
            TransportKind::Tls,
            local,
            remote,
            self.inner.limits,
            self.inner.events_tx.clone(),
            self.inner.connections.clone(),
        );
        Ok(connection)
    }

    fn spawn_accept_loop(&self, listener: TcpListener, acceptor: TlsAcceptor) {
        let connector = self.clone();
        tokio::spawn(async move {
            let inner = &connector.inner;
            loop {
                let accepted = tokio::select! {
                    r = listener.accept() => r,
                    _ = inner.shutdown.notified() => break,
                };
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("TLS accept error: {}", e);
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let connector = connector.clone();
                // handshake off the accept loop
                tokio::spawn(async move {
                    let inner = &connector.inner;
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            debug!("Accepted TLS connection from {}", remote);
                            spawn_stream_session(
                                tls_stream,
                                TransportKind::Tls,
                                inner.local_addr,
                                remote,
                                inner.limits,
                                inner.events_tx.clone(),
                                inner.connections.clone(),
                            );
                        }
                        Err(e) => warn!("TLS handshake with {} failed: {}", remote, e),
                    }
                });
            }
            let _ = inner
                .events_tx
                .send(TransportEvent::Closed {
                    transport: TransportKind::Tls,
                    local_addr: inner.local_addr,
                })
                .await;
            info!("TLS accept loop terminated");
        });
    }
}

#[async_trait]
impl Connector for TlsConnector {
    fn transport(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Dial `remote`, verifying the certificate against its IP address
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SipConnection>> {
        self.dial(remote, ServerName::IpAddress(remote.ip())).await
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

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsConnector({})", self.inner.local_addr)
    }
}
