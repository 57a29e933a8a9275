//! # SIP Methods
//!
//! Request methods from RFC 3261 and its extensions (PRACK, SUBSCRIBE,
//! NOTIFY, REFER, MESSAGE, UPDATE, PUBLISH, INFO). Unknown tokens are kept
//! as [`Method::Extension`].
//!
//! [`Method::look_ahead`] is the parser's fast path: it recognises a known
//! method as a contiguous run at the start of a buffer, followed by a space,
//! without going through the per-byte state machine.
//!
//! ```rust
//! use siplet_sip_core::Method;
//!
//! assert_eq!(Method::look_ahead(b"INVITE sip:bob@b.com SIP/2.0"), Some(Method::Invite));
//! assert_eq!(Method::look_ahead(b"INVITE"), None);
//! assert_eq!("FOO".parse::<Method>().unwrap(), Method::Extension("FOO".into()));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grammar;

/// SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Ack,
    Bye,
    Cancel,
    Info,
    Invite,
    Message,
    Notify,
    Options,
    Prack,
    Publish,
    Refer,
    Register,
    Subscribe,
    Update,
    /// Any other token
    Extension(String),
}

static KNOWN: [Method; 14] = [
    Method::Ack,
    Method::Bye,
    Method::Cancel,
    Method::Info,
    Method::Invite,
    Method::Message,
    Method::Notify,
    Method::Options,
    Method::Prack,
    Method::Publish,
    Method::Refer,
    Method::Register,
    Method::Subscribe,
    Method::Update,
];

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Info => "INFO",
            Method::Invite => "INVITE",
            Method::Message => "MESSAGE",
            Method::Notify => "NOTIFY",
            Method::Options => "OPTIONS",
            Method::Prack => "PRACK",
            Method::Publish => "PUBLISH",
            Method::Refer => "REFER",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Update => "UPDATE",
            Method::Extension(s) => s,
        }
    }

    /// Match a known method followed by a space at the start of `bytes`.
    ///
    /// Returns `None` when the bytes are not (or not yet) a complete known
    /// method; the caller then falls back to the generic token scan.
    pub fn look_ahead(bytes: &[u8]) -> Option<Method> {
        let candidates: &[Method] = match bytes.first()? {
            b'A' => &KNOWN[0..1],
            b'B' => &KNOWN[1..2],
            b'C' => &KNOWN[2..3],
            b'I' => &KNOWN[3..5],
            b'M' => &KNOWN[5..6],
            b'N' => &KNOWN[6..7],
            b'O' => &KNOWN[7..8],
            b'P' => &KNOWN[8..10],
            b'R' => &KNOWN[10..12],
            b'S' => &KNOWN[12..13],
            b'U' => &KNOWN[13..14],
            _ => return None,
        };
        candidates.iter().find_map(|m| {
            let name = m.as_str().as_bytes();
            if bytes.len() > name.len() && bytes.starts_with(name) && bytes[name.len()] == b' ' {
                Some(m.clone())
            } else {
                None
            }
        })
    }

    /// Method for a token that is already known to be well-formed.
    ///
    /// SIP methods are case-sensitive, so `invite` is an extension method.
    pub fn from_bytes(token: &[u8]) -> Method {
        for m in KNOWN.iter() {
            if m.as_str().as_bytes() == token {
                return m.clone();
            }
        }
        Method::Extension(String::from_utf8_lossy(token).into_owned())
    }

    pub fn is_invite(&self) -> bool {
        *self == Method::Invite
    }

    pub fn is_ack(&self) -> bool {
        *self == Method::Ack
    }

    pub fn is_cancel(&self) -> bool {
        *self == Method::Cancel
    }

    /// Methods that may establish a dialog
    pub fn creates_dialog(&self) -> bool {
        matches!(self, Method::Invite | Method::Subscribe | Method::Refer)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !grammar::is_token(s) {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(Method::from_bytes(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_ahead_known_methods() {
        for m in KNOWN.iter() {
            let line = format!("{} sip:a@b SIP/2.0", m);
            assert_eq!(Method::look_ahead(line.as_bytes()), Some(m.clone()));
        }
    }

    #[test]
    fn test_look_ahead_misses() {
        assert_eq!(Method::look_ahead(b"INVITEX sip:a@b"), None);
        assert_eq!(Method::look_ahead(b"INV"), None);
        assert_eq!(Method::look_ahead(b"SIP/2.0 200 OK"), None);
        assert_eq!(Method::look_ahead(b""), None);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("BYE".parse::<Method>().unwrap(), Method::Bye);
        assert_eq!(
            "invite".parse::<Method>().unwrap(),
            Method::Extension("invite".to_string())
        );
        assert!("BAD METHOD".parse::<Method>().is_err());
    }
}
