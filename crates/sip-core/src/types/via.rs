//! # Via
//!
//! One Via entry (RFC 3261 §20.42). A Via header line carrying several
//! comma-separated entries is split by the message builder, so each entry
//! is stored as its own field in [`Fields`](crate::types::Fields).
//!
//! ```text
//! Via: SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776asdhds;rport
//!      └──┬──┘ └┬┘ └──────┬───────┘ └┬─┘ └────────────┬────────────┘
//!      protocol transport  host      port          params
//! ```
//!
//! The top Via's `branch` is the transaction key.
//!
//! ```rust
//! use siplet_sip_core::Via;
//!
//! let via: Via = "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds".parse().unwrap();
//! assert_eq!(via.transport(), "UDP");
//! assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
//! assert!(via.has_magic_cookie());
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::grammar::{self, Scanner};
use crate::types::param::Parameters;
use crate::types::uri::{parse_hostport, write_hostport};

/// A single Via entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    protocol: String,
    transport: String,
    host: String,
    port: Option<u16>,
    params: Parameters,
}

impl Via {
    /// `SIP/2.0/<transport> host[:port];branch=<branch>`
    pub fn new(transport: &str, host: impl Into<String>, port: Option<u16>, branch: &str) -> Self {
        let mut params = Parameters::new();
        params.set("branch", Some(branch));
        Via {
            protocol: "SIP/2.0".to_string(),
            transport: transport.to_ascii_uppercase(),
            host: host.into(),
            port,
            params,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let mut s = Scanner::new(input.trim());

        let name = s.read_token();
        s.skip_ws();
        s.expect('/')?;
        s.skip_ws();
        let version = s.read_token();
        s.skip_ws();
        s.expect('/')?;
        s.skip_ws();
        let transport = s.read_token();
        if name.is_empty() || version.is_empty() || transport.is_empty() {
            return Err(Error::Parse(format!("Bad sent-protocol in Via: {}", input)));
        }
        s.skip_ws();

        let rest = s.rest();
        let (hostport, params) = match rest.find(';') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = parse_hostport(hostport)
            .map_err(|e| Error::Parse(format!("{} in Via: {}", e, input)))?;

        Ok(Via {
            protocol: format!("{}/{}", name, version),
            transport: transport.to_ascii_uppercase(),
            host,
            port,
            params: Parameters::parse(params)?,
        })
    }

    /// `SIP/2.0`
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Upper-cased transport token, e.g. `UDP`, `TLS`, `WS`
    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn branch(&self) -> Option<&str> {
        self.params.get("branch").filter(|b| !b.is_empty())
    }

    pub fn set_branch(&mut self, branch: &str) {
        self.params.set("branch", Some(branch));
    }

    /// Branch carries the RFC 3261 `z9hG4bK` prefix
    pub fn has_magic_cookie(&self) -> bool {
        self.branch()
            .is_some_and(|b| b.starts_with(grammar::MAGIC_COOKIE))
    }

    pub fn received(&self) -> Option<&str> {
        self.params.get("received").filter(|r| !r.is_empty())
    }

    pub fn set_received(&mut self, addr: &str) {
        self.params.set("received", Some(addr));
    }

    /// `Some(None)` for a bare `;rport` flag, `Some(Some(port))` once filled
    pub fn rport(&self) -> Option<Option<u16>> {
        self.params.get("rport").map(|v| v.parse().ok())
    }

    pub fn set_rport(&mut self, port: Option<u16>) {
        let value = port.map(|p| p.to_string());
        self.params.set("rport", value.as_deref());
    }

    pub fn maddr(&self) -> Option<&str> {
        self.params.get("maddr")
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ", self.protocol, self.transport)?;
        write_hostport(f, &self.host, self.port)?;
        write!(f, "{}", self.params)
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Via::parse(s)
    }
}
