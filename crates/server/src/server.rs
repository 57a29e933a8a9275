//! Server lifecycle
//!
//! ```text
//!  ┌──────────────────────────────────────────┐
//!  │               SipServer                  │
//!  ├──────────────────────────────────────────┤
//!  │ UDP │ TCP │ TLS │ WS connectors          │
//!  │        │ TransportEvent channel          │
//!  ├──────────────────────────────────────────┤
//!  │ TransactionManager (listener task)       │
//!  ├──────────────────────────────────────────┤
//!  │ CallSessionManager + global scheduler    │
//!  └──────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use siplet_sip_transport::{
    event_channel, load_server_config, Connector, SipConnection, TcpConnector, TlsConnector,
    TransportKind, UdpConnector, WsConnector,
};
use siplet_transaction_core::{SipHandler, StatsSnapshot, TransactionManager};

use crate::config::ServerConfig;

/// A running SIP server
pub struct SipServer {
    config: ServerConfig,
    manager: TransactionManager,
    connectors: Vec<Arc<dyn Connector>>,
    listener_handle: Option<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl SipServer {
    /// Bind every configured connector and start processing messages.
    ///
    /// If any connector fails to bind, the ones already bound are closed.
    pub async fn start(config: ServerConfig, handler: Arc<dyn SipHandler>) -> Result<Self> {
        config.validate()?;
        let manager = TransactionManager::new(config.transaction, handler);
        let (events_tx, events_rx) = event_channel();

        let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();
        let bound = Self::bind_connectors(&config, events_tx, &mut connectors).await;
        if let Err(e) = bound {
            for connector in &connectors {
                let _ = connector.close().await;
            }
            return Err(e);
        }

        let scheduler_handle = manager.start();
        let listener_handle = manager.spawn(events_rx);
        for connector in &connectors {
            info!("Listening on {} {}", connector.transport(), connector.local_addr());
        }

        Ok(Self {
            config,
            manager,
            connectors,
            listener_handle: Some(listener_handle),
            scheduler_handle: Some(scheduler_handle),
        })
    }

    async fn bind_connectors(
        config: &ServerConfig,
        events_tx: siplet_sip_transport::EventSender,
        connectors: &mut Vec<Arc<dyn Connector>>,
    ) -> Result<()> {
        let limits = config.stream_limits();
        if let Some(addr) = config.udp {
            let udp = UdpConnector::bind(addr, config.udp_mtu, events_tx.clone())
                .await
                .with_context(|| format!("Cannot bind UDP on {}", addr))?;
            connectors.push(Arc::new(udp));
        }
        if let Some(addr) = config.tcp {
            let tcp = TcpConnector::bind(addr, limits, events_tx.clone())
                .await
                .with_context(|| format!("Cannot bind TCP on {}", addr))?;
            connectors.push(Arc::new(tcp));
        }
        if let Some(tls) = &config.tls {
            let server_config = load_server_config(&tls.cert_path, &tls.key_path).with_context(|| {
                format!("Cannot load TLS certificate {}", tls.cert_path.display())
            })?;
            let tls_events = events_tx.clone();
            let connector = TlsConnector::bind(tls.addr, server_config, None, limits, tls_events)
                .await
                .with_context(|| format!("Cannot bind TLS on {}", tls.addr))?;
            connectors.push(Arc::new(connector));
        }
        if let Some(addr) = config.ws {
            let ws = WsConnector::bind(addr, limits, events_tx)
                .await
                .with_context(|| format!("Cannot bind WebSocket on {}", addr))?;
            connectors.push(Arc::new(ws));
        }
        Ok(())
    }

    /// Close every connector and stop the session manager. Pending timers
    /// are cancelled.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping SIP server");
        for connector in &self.connectors {
            if let Err(e) = connector.close().await {
                warn!("Error closing {} connector: {}", connector.transport(), e);
            }
        }
        self.manager.stop();

        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }
        info!("SIP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.manager.stats()
    }

    pub fn is_running(&self) -> bool {
        self.listener_handle.is_some()
    }

    /// Bound address of the first connector of `transport`
    pub fn local_addr(&self, transport: TransportKind) -> Option<SocketAddr> {
        self.connector(transport).map(|c| c.local_addr())
    }

    pub fn connector(&self, transport: TransportKind) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.transport() == transport)
    }

    /// Outbound connection to `remote` over `transport`
    pub async fn connect(
        &self,
        transport: TransportKind,
        remote: SocketAddr,
    ) -> Result<Arc<dyn SipConnection>> {
        let connector = self
            .connector(transport)
            .with_context(|| format!("No {} connector configured", transport))?;
        Ok(connector.connect(remote).await?)
    }
}

impl Drop for SipServer {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
            self.manager.stop();
        }
    }
}
