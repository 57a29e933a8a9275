//! SIP protocol version

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Protocol version; only `SIP/2.0` is supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Version {
    #[default]
    Sip20,
}

const SIP_2_0: &[u8] = b"SIP/2.0";

impl Version {
    pub fn as_str(&self) -> &'static str {
        "SIP/2.0"
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        SIP_2_0
    }

    /// Match `SIP/2.0` followed by a whitespace byte at the start of `bytes`
    pub fn look_ahead(bytes: &[u8]) -> Option<Version> {
        if bytes.len() > SIP_2_0.len()
            && bytes.starts_with(SIP_2_0)
            && matches!(bytes[SIP_2_0.len()], b' ' | b'\t' | b'\r' | b'\n')
        {
            Some(Version::Sip20)
        } else {
            None
        }
    }

    /// Version for a complete token, `None` if unsupported
    pub fn from_bytes(token: &[u8]) -> Option<Version> {
        if token == SIP_2_0 {
            Some(Version::Sip20)
        } else {
            None
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::from_bytes(s.as_bytes())
            .ok_or_else(|| Error::Parse(format!("Unknown version {}", s)))
    }
}
