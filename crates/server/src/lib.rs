//! # siplet-server
//!
//! Wires the siplet crates into a runnable server: a TOML
//! [`ServerConfig`], connectors for each configured transport and a
//! [`TransactionManager`](siplet_transaction_core::TransactionManager)
//! fed by their events.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siplet_server::{OptionsResponder, ServerConfig, SipServer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::from_toml_str("udp = \"127.0.0.1:5060\"")?;
//! let mut server = SipServer::start(config, Arc::new(OptionsResponder::default())).await?;
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod handler;
pub mod server;

pub use config::{LogSettings, ServerConfig, TlsListenConfig};
pub use handler::OptionsResponder;
pub use server::SipServer;
