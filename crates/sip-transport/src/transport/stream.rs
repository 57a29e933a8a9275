//! Connection-oriented sessions shared by TCP and TLS
//!
//! Every accepted or dialed stream gets a reader task that feeds a
//! [`MessageDecoder`] and a writer task fed by an unbounded channel, so
//! [`SipConnection::write`] never blocks the caller.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use siplet_sip_core::Framing;

use crate::error::{Error, Result};
use crate::transport::decoder::{Decoded, MessageDecoder};
use crate::transport::{EventSender, SipConnection, TransportEvent, TransportKind};

/// Default bound on messages generated for a stream
pub const DEFAULT_STREAM_MESSAGE_SIZE: usize = 64 * 1024;

pub(crate) enum Outbound {
    Data(Bytes),
    Close,
}

/// Open connections of one connector, by remote address
pub(crate) type Registry = Arc<DashMap<SocketAddr, Arc<StreamConnection>>>;

/// Connection whose writes are queued for a writer task
pub struct StreamConnection {
    transport: TransportKind,
    local: SocketAddr,
    remote: SocketAddr,
    max_message_size: usize,
    open: AtomicBool,
    closing: Notify,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl StreamConnection {
    pub(crate) fn new(
        transport: TransportKind,
        local: SocketAddr,
        remote: SocketAddr,
        max_message_size: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(StreamConnection {
            transport,
            local,
            remote,
            max_message_size,
            open: AtomicBool::new(true),
            closing: Notify::new(),
            tx,
        });
        (connection, rx)
    }

    /// Flush what is queued, then close the stream
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("Closing {} connection to {}", self.transport, self.remote);
            let _ = self.tx.send(Outbound::Close);
            self.closing.notify_one();
        }
    }

    pub(crate) async fn closed(&self) {
        self.closing.notified().await
    }
}

impl SipConnection for StreamConnection {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::TransportClosed);
        }
        self.tx
            .send(Outbound::Data(bytes))
            .map_err(|_| Error::TransportClosed)
    }
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamConnection({} {} -> {})", self.transport, self.local, self.remote)
    }
}

/// Limits applied to one stream session
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Largest message generated on the stream
    pub max_outbound: usize,
    /// Largest message buffered from the stream
    pub max_inbound: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        StreamLimits {
            max_outbound: DEFAULT_STREAM_MESSAGE_SIZE,
            max_inbound: crate::transport::decoder::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Start the reader and writer tasks for `stream` and register the connection
pub(crate) fn spawn_stream_session<S>(
    stream: S,
    transport: TransportKind,
    local: SocketAddr,
    remote: SocketAddr,
    limits: StreamLimits,
    events_tx: EventSender,
    registry: Registry,
) -> Arc<StreamConnection>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (connection, mut rx) = StreamConnection::new(transport, local, remote, limits.max_outbound);
    registry.insert(remote, connection.clone());
    let (mut reader, mut writer) = tokio::io::split(stream);

    let writer_connection = connection.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Data(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!("{} write error to {}: {}", transport, remote, e);
                        writer_connection.close();
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
    });

    let reader_connection = connection.clone();
    tokio::spawn(async move {
        let connection = reader_connection;
        let mut decoder =
            MessageDecoder::with_max_message_size(Framing::Stream, limits.max_inbound);
        'read: loop {
            let read = tokio::select! {
                r = reader.read_buf(decoder.buffer_mut()) => r,
                _ = connection.closed() => break 'read,
            };
            match read {
                Ok(0) => {
                    debug!("{} connection from {} closed by peer", transport, remote);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{} read error from {}: {}", transport, remote, e);
                    break;
                }
            }

            while let Some(decoded) = decoder.decode() {
                match decoded {
                    Decoded::Message(message) => {
                        let event = TransportEvent::MessageReceived {
                            message,
                            connection: connection.clone(),
                        };
                        if events_tx.send(event).await.is_err() {
                            warn!("Event receiver dropped, closing {} connection", transport);
                            break 'read;
                        }
                    }
                    Decoded::Bad(bad) => {
                        warn!(
                            status = bad.status,
                            reason = %bad.reason,
                            "Bad message on {} from {}",
                            transport,
                            remote
                        );
                        if let Some(response) = bad.error_response() {
                            if let Err(e) = connection.send_response(&response) {
                                debug!("Could not answer bad message: {}", e);
                            }
                        }
                        // framing is lost, the stream cannot be resynchronized
                        break 'read;
                    }
                }
            }
        }

        connection.close();
        registry.remove_if(&remote, |_, c| Arc::ptr_eq(c, &connection));
        info!("{} connection {} -> {} terminated", transport, local, remote);
    });

    connection
}
