//! SIP over WebSocket
//!
//! Each WebSocket message carries exactly one SIP message, so frames are
//! decoded with datagram framing. Both ends negotiate the `sip`
//! subprotocol.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, client_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use siplet_sip_core::Framing;

use crate::error::{Error, Result};
use crate::transport::decoder::{Decoded, MessageDecoder};
use crate::transport::stream::{Outbound, Registry, StreamConnection, StreamLimits};
use crate::transport::{Connector, EventSender, SipConnection, TransportEvent, TransportKind};

/// WebSocket subprotocol for SIP
pub const SIP_SUBPROTOCOL: &str = "sip";

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// WebSocket connector
#[derive(Clone)]
pub struct WsConnector {
    inner: Arc<WsConnectorInner>,
}

struct WsConnectorInner {
    local_addr: SocketAddr,
    limits: StreamLimits,
    connections: Registry,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: EventSender,
}

impl WsConnector {
    pub async fn bind(
        addr: SocketAddr,
        limits: StreamLimits,
        events_tx: EventSender,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SIP WebSocket connector bound to {}", local_addr);

        let connector = WsConnector {
            inner: Arc::new(WsConnectorInner {
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
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("WebSocket accept error: {}", e);
                        continue;
                    }
                };
                let connector = connector.clone();
                tokio::spawn(async move {
                    let callback = |req: &Request, mut response: Response| {
                        if let Some(protocol) = req.headers().get(SUBPROTOCOL_HEADER) {
                            let offered = protocol
                                .to_str()
                                .map(|p| {
                                    p.split(',')
                                        .any(|p| p.trim().eq_ignore_ascii_case(SIP_SUBPROTOCOL))
                                })
                                .unwrap_or(false);
                            if offered {
                                response.headers_mut().insert(
                                    SUBPROTOCOL_HEADER,
                                    HeaderValue::from_static(SIP_SUBPROTOCOL),
                                );
                            }
                        }
                        Ok::<_, ErrorResponse>(response)
                    };
                    match accept_hdr_async(stream, callback).await {
                        Ok(ws) => {
                            debug!("Accepted WebSocket connection from {}", remote);
                            let inner = &connector.inner;
                            spawn_ws_session(
                                ws,
                                inner.local_addr,
                                remote,
                                inner.limits,
                                inner.events_tx.clone(),
                                inner.connections.clone(),
                            );
                        }
                        Err(e) => warn!("WebSocket handshake with {} failed: {}", remote, e),
                    }
                });
            }
            let _ = inner
                .events_tx
                .send(TransportEvent::Closed {
                    transport: TransportKind::Ws,
                    local_addr: inner.local_addr,
                })
                .await;
            info!("WebSocket accept loop terminated");
        });
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn transport(&self) -> TransportKind {
        TransportKind::Ws
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
        let mut request = format!("ws://{}/", remote)
            .into_client_request()
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        request
            .headers_mut()
            .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(SIP_SUBPROTOCOL));
        let (ws, _response) = client_async(request, stream)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        debug!("Opened WebSocket connection {} -> {}", local, remote);
        let connection: Arc<StreamConnection> = spawn_ws_session(
            ws,
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

impl fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WsConnector({})", self.inner.local_addr)
    }
}

fn spawn_ws_session<S>(
    ws: WebSocketStream<S>,
    local: SocketAddr,
    remote: SocketAddr,
    limits: StreamLimits,
    events_tx: EventSender,
    registry: Registry,
) -> Arc<StreamConnection>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (connection, mut rx) =
        StreamConnection::new(TransportKind::Ws, local, remote, limits.max_outbound);
    registry.insert(remote, connection.clone());
    let (mut sink, mut frames) = ws.split();

    let writer_connection = connection.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Data(bytes) => {
                    let frame = match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Message::Text(text),
                        Err(e) => Message::Binary(e.into_bytes()),
                    };
                    if let Err(e) = sink.send(frame).await {
                        warn!("WebSocket write error to {}: {}", remote, e);
                        writer_connection.close();
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    let reader_connection = connection.clone();
    tokio::spawn(async move {
        let connection = reader_connection;
        let mut decoder =
            MessageDecoder::with_max_message_size(Framing::Datagram, limits.max_inbound);
        loop {
            let frame = tokio::select! {
                f = frames.next() => f,
                _ = connection.closed() => break,
            };
            let data = match frame {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket connection from {} closed by peer", remote);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket read error from {}: {}", remote, e);
                    break;
                }
            };

            match decoder.decode_datagram(&data) {
                Some(Decoded::Message(message)) => {
                    let event = TransportEvent::MessageReceived {
                        message,
                        connection: connection.clone(),
                    };
                    if events_tx.send(event).await.is_err() {
                        warn!("Event receiver dropped, closing WebSocket connection");
                        break;
                    }
                }
                Some(Decoded::Bad(bad)) => {
                    warn!(
                        status = bad.status,
                        reason = %bad.reason,
                        "Bad message on WS from {}",
                        remote
                    );
                    if let Some(response) = bad.error_response() {
                        if let Err(e) = connection.send_response(&response) {
                            debug!("Could not answer bad message: {}", e);
                        }
                    }
                }
                None => {}
            }
        }

        connection.close();
        registry.remove_if(&remote, |_, c| Arc::ptr_eq(c, &connection));
        info!("WebSocket connection {} -> {} terminated", local, remote);
    });

    connection
}
