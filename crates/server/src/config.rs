//! Server configuration
//!
//! Loaded from TOML. Listeners absent from the file are disabled; at least
//! one must be present. Everything else falls back to its default.
//!
//! ```toml
//! udp = "0.0.0.0:5060"
//! tcp = "0.0.0.0:5060"
//! ws = "0.0.0.0:8080"
//! udp_mtu = 1500
//!
//! [tls]
//! addr = "0.0.0.0:5061"
//! cert_path = "/etc/siplet/cert.pem"
//! key_path = "/etc/siplet/key.pem"
//!
//! [log]
//! level = "info"
//! json = false
//!
//! [transaction.timers]
//! t1 = 500
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use siplet_infra_common::{parse_log_level, LoggingConfig};
use siplet_sip_transport::{StreamLimits, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MTU};
use siplet_transaction_core::TransactionConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsListenConfig {
    pub addr: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    /// Extra `EnvFilter` directives
    pub directives: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default)]
    pub udp: Option<SocketAddr>,
    pub tcp: Option<SocketAddr>,
    pub ws: Option<SocketAddr>,
    pub tls: Option<TlsListenConfig>,

    /// Largest datagram sent over UDP
    pub udp_mtu: usize,

    /// Largest message buffered from a stream connection
    pub max_inbound_message_size: usize,

    /// Largest message generated on a stream connection
    pub max_outbound_message_size: usize,

    pub log: LogSettings,
    pub transaction: TransactionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp: Some(SocketAddr::from(([0, 0, 0, 0], 5060))),
            tcp: None,
            ws: None,
            tls: None,
            udp_mtu: DEFAULT_MTU,
            max_inbound_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_outbound_message_size: StreamLimits::default().max_outbound,
            log: LogSettings::default(),
            transaction: TransactionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(contents).context("Invalid server configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.udp.is_none() && self.tcp.is_none() && self.ws.is_none() && self.tls.is_none() {
            bail!("At least one listen address must be configured");
        }
        if self.udp_mtu < 200 {
            bail!("UDP MTU {} is too small", self.udp_mtu);
        }
        if self.max_inbound_message_size == 0 || self.max_outbound_message_size == 0 {
            bail!("Message size limits must be positive");
        }
        parse_log_level(&self.log.level)?;
        self.transaction.validate()?;
        Ok(())
    }

    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_outbound: self.max_outbound_message_size,
            max_inbound: self.max_inbound_message_size,
        }
    }

    pub fn logging_config(&self) -> Result<LoggingConfig> {
        let mut logging = LoggingConfig::new(parse_log_level(&self.log.level)?, "siplet-server");
        if self.log.json {
            logging = logging.with_json();
        }
        if self.log.file_info {
            logging = logging.with_file_info();
        }
        for directive in &self.log.directives {
            logging = logging.with_directive(directive.clone());
        }
        Ok(logging)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults_listen_on_udp() {
        let config = ServerConfig::default();
        assert_eq!(config.udp.map(|a| a.port()), Some(5060));
        assert!(config.tcp.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            udp = "127.0.0.1:5070"
            tcp = "127.0.0.1:5071"
            udp_mtu = 1400

            [log]
            level = "debug"
            directives = ["siplet_transaction_core=trace"]

            [transaction.timers]
            t1 = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.udp, Some("127.0.0.1:5070".parse().unwrap()));
        assert_eq!(config.tcp, Some("127.0.0.1:5071".parse().unwrap()));
        assert_eq!(config.udp_mtu, 1400);
        assert_eq!(config.transaction.timers.t1, Duration::from_millis(250));
        assert_eq!(config.transaction.timers.t2, Duration::from_secs(4));

        let logging = config.logging_config().unwrap();
        assert_eq!(logging.level, tracing::Level::DEBUG);
        assert_eq!(logging.directives.len(), 1);
    }

    #[test]
    fn test_tls_section() {
        let config = ServerConfig::from_toml_str(
            r#"
            [tls]
            addr = "0.0.0.0:5061"
            cert_path = "cert.pem"
            key_path = "key.pem"
            "#,
        )
        .unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.addr.port(), 5061);
        assert_eq!(tls.key_path, PathBuf::from("key.pem"));
    }

    #[test]
    fn test_rejected_values() {
        let udp = "udp = \"127.0.0.1:5060\"\n";
        assert!(ServerConfig::from_toml_str(udp).is_ok());
        assert!(ServerConfig::from_toml_str("").is_err());
        assert!(ServerConfig::from_toml_str(&format!("{udp}udp_mtu = 10")).is_err());
        assert!(ServerConfig::from_toml_str(&format!("{udp}[log]\nlevel = \"loud\"")).is_err());
        let zero_t1 = format!("{udp}[transaction.timers]\nt1 = 0");
        assert!(ServerConfig::from_toml_str(&zero_t1).is_err());
        assert!(ServerConfig::from_toml_str("udp = \"not an address\"").is_err());

        let none = ServerConfig {
            udp: None,
            ..ServerConfig::default()
        };
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ServerConfig::default();
        config.ws = Some("127.0.0.1:8080".parse().unwrap());
        let text = config.to_toml_string().unwrap();
        assert_eq!(ServerConfig::from_toml_str(&text).unwrap(), config);
    }
}
