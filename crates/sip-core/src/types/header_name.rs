//! # Header names
//!
//! A closed table of well-known SIP headers with an [`HeaderName::Other`]
//! escape hatch. Each known header carries its canonical spelling, its
//! compact form (RFC 3261 §7.3.3 and extensions), the value class it parses
//! into and whether it is a protected system header or a comma-list.
//!
//! Lookups are case-insensitive and allocation-free for names up to 64 bytes.
//!
//! ```rust
//! use siplet_sip_core::{HeaderKind, HeaderName};
//!
//! assert_eq!(HeaderName::from_bytes(b"v"), HeaderName::Via);
//! assert_eq!(HeaderName::from_bytes(b"call-id"), HeaderName::CallId);
//! assert_eq!(HeaderName::Contact.kind(), HeaderKind::Address);
//! assert!(HeaderName::CSeq.is_system());
//! assert_eq!(HeaderName::from_bytes(b"X-Trace"), HeaderName::Other("x-trace".into()));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grammar;

/// Value class a header parses into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// Plain text value
    Text,
    /// `name-addr` / `addr-spec` with parameters
    Address,
    /// A single Via entry
    Via,
    /// Token or media type followed by parameters
    Parameterable,
}

const SYSTEM: u8 = 0x01;
const LIST: u8 = 0x02;

macro_rules! headers {
    ($( $variant:ident => $name:literal, $compact:expr, $kind:ident, $flags:expr; )*) => {
        /// SIP header name
        #[derive(Debug, Clone, Eq, Serialize, Deserialize)]
        pub enum HeaderName {
            $( $variant, )*
            /// Any header without a dedicated variant
            Other(String),
        }

        impl HeaderName {
            /// Canonical spelling
            pub fn as_str(&self) -> &str {
                match self {
                    $( HeaderName::$variant => $name, )*
                    HeaderName::Other(name) => name,
                }
            }

            /// Single-letter compact form, if the header has one
            pub fn compact_form(&self) -> Option<char> {
                match self {
                    $( HeaderName::$variant => $compact, )*
                    HeaderName::Other(_) => None,
                }
            }

            /// Value class used by the message builder
            pub fn kind(&self) -> HeaderKind {
                match self {
                    $( HeaderName::$variant => HeaderKind::$kind, )*
                    HeaderName::Other(_) => HeaderKind::Text,
                }
            }

            fn flags(&self) -> u8 {
                match self {
                    $( HeaderName::$variant => $flags, )*
                    HeaderName::Other(_) => 0,
                }
            }
        }

        lazy_static! {
            static ref BY_NAME: HashMap<String, HeaderName> = {
                let mut map = HashMap::new();
                $(
                    map.insert($name.to_ascii_lowercase(), HeaderName::$variant);
                    if let Some(c) = $compact {
                        let c: char = c;
                        map.insert(c.to_string(), HeaderName::$variant);
                    }
                )*
                map
            };
        }
    };
}

headers! {
    Via => "Via", Some('v'), Via, SYSTEM | LIST;
    From => "From", Some('f'), Address, SYSTEM;
    To => "To", Some('t'), Address, SYSTEM;
    CallId => "Call-ID", Some('i'), Text, SYSTEM;
    CSeq => "CSeq", None, Text, SYSTEM;
    Route => "Route", None, Address, SYSTEM | LIST;
    RecordRoute => "Record-Route", None, Address, SYSTEM | LIST;
    RAck => "RAck", None, Text, SYSTEM;
    RSeq => "RSeq", None, Text, SYSTEM;
    ContentLength => "Content-Length", Some('l'), Text, SYSTEM;
    Contact => "Contact", Some('m'), Address, LIST;
    MaxForwards => "Max-Forwards", None, Text, 0;
    ContentType => "Content-Type", Some('c'), Parameterable, 0;
    ContentEncoding => "Content-Encoding", Some('e'), Text, LIST;
    ContentDisposition => "Content-Disposition", None, Parameterable, 0;
    ContentLanguage => "Content-Language", None, Text, LIST;
    Accept => "Accept", None, Parameterable, LIST;
    AcceptEncoding => "Accept-Encoding", None, Parameterable, LIST;
    AcceptLanguage => "Accept-Language", None, Parameterable, LIST;
    AcceptContact => "Accept-Contact", Some('a'), Parameterable, LIST;
    RejectContact => "Reject-Contact", Some('j'), Parameterable, LIST;
    RequestDisposition => "Request-Disposition", Some('d'), Text, LIST;
    AlertInfo => "Alert-Info", None, Text, LIST;
    Allow => "Allow", None, Text, LIST;
    AllowEvents => "Allow-Events", Some('u'), Text, LIST;
    Authorization => "Authorization", None, Text, 0;
    ProxyAuthorization => "Proxy-Authorization", None, Text, 0;
    WwwAuthenticate => "WWW-Authenticate", None, Text, 0;
    ProxyAuthenticate => "Proxy-Authenticate", None, Text, 0;
    AuthenticationInfo => "Authentication-Info", None, Text, 0;
    CallInfo => "Call-Info", None, Text, LIST;
    Date => "Date", None, Text, 0;
    ErrorInfo => "Error-Info", None, Text, LIST;
    Event => "Event", Some('o'), Parameterable, 0;
    Expires => "Expires", None, Text, 0;
    Identity => "Identity", Some('y'), Text, 0;
    InReplyTo => "In-Reply-To", None, Text, LIST;
    MimeVersion => "MIME-Version", None, Text, 0;
    MinExpires => "Min-Expires", None, Text, 0;
    MinSe => "Min-SE", None, Parameterable, 0;
    Organization => "Organization", None, Text, 0;
    PAssertedIdentity => "P-Asserted-Identity", None, Address, LIST;
    Path => "Path", None, Address, LIST;
    Priority => "Priority", None, Text, 0;
    ProxyRequire => "Proxy-Require", None, Text, LIST;
    Reason => "Reason", None, Parameterable, LIST;
    ReferTo => "Refer-To", Some('r'), Address, 0;
    ReferredBy => "Referred-By", Some('b'), Address, 0;
    Replaces => "Replaces", None, Parameterable, 0;
    ReplyTo => "Reply-To", None, Address, 0;
    Require => "Require", None, Text, LIST;
    RetryAfter => "Retry-After", None, Parameterable, 0;
    Server => "Server", None, Text, 0;
    ServiceRoute => "Service-Route", None, Address, LIST;
    SessionExpires => "Session-Expires", Some('x'), Parameterable, 0;
    Subject => "Subject", Some('s'), Text, 0;
    SubscriptionState => "Subscription-State", None, Parameterable, 0;
    Supported => "Supported", Some('k'), Text, LIST;
    Timestamp => "Timestamp", None, Text, 0;
    Unsupported => "Unsupported", None, Text, LIST;
    UserAgent => "User-Agent", None, Text, 0;
    Warning => "Warning", None, Text, LIST;
}

const MAX_LOOKUP: usize = 64;

impl HeaderName {
    /// Resolve a header name from raw bytes, accepting compact forms.
    ///
    /// Unknown names become [`HeaderName::Other`] with their original
    /// spelling; `Other` compares case-insensitively.
    pub fn from_bytes(name: &[u8]) -> HeaderName {
        if name.len() <= MAX_LOOKUP {
            let mut lower = [0u8; MAX_LOOKUP];
            for (dst, src) in lower.iter_mut().zip(name) {
                *dst = src.to_ascii_lowercase();
            }
            if let Ok(key) = std::str::from_utf8(&lower[..name.len()]) {
                if let Some(header) = BY_NAME.get(key) {
                    return header.clone();
                }
            }
        }
        HeaderName::Other(String::from_utf8_lossy(name).into_owned())
    }

    /// Protected from application mutation
    pub fn is_system(&self) -> bool {
        self.flags() & SYSTEM != 0
    }

    /// Header whose value is a comma-separated list
    pub fn is_list(&self) -> bool {
        self.flags() & LIST != 0
    }

    /// Spelling used on the wire, compact if requested and available
    pub fn wire_name(&self, compact: bool) -> std::borrow::Cow<'_, str> {
        match (compact, self.compact_form()) {
            (true, Some(c)) => std::borrow::Cow::Owned(c.to_string()),
            _ => std::borrow::Cow::Borrowed(self.as_str()),
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HeaderName::Other(a), HeaderName::Other(b)) => a.eq_ignore_ascii_case(b),
            (HeaderName::Other(_), _) | (_, HeaderName::Other(_)) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let HeaderName::Other(name) = self {
            for b in name.bytes() {
                state.write_u8(b.to_ascii_lowercase());
            }
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !grammar::is_token(s) {
            return Err(Error::Parse(format!("Invalid header name: {}", s)));
        }
        Ok(HeaderName::from_bytes(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_forms() {
        let pairs = [
            ("v", HeaderName::Via),
            ("f", HeaderName::From),
            ("t", HeaderName::To),
            ("i", HeaderName::CallId),
            ("m", HeaderName::Contact),
            ("l", HeaderName::ContentLength),
            ("c", HeaderName::ContentType),
            ("k", HeaderName::Supported),
            ("s", HeaderName::Subject),
            ("e", HeaderName::ContentEncoding),
            ("o", HeaderName::Event),
            ("r", HeaderName::ReferTo),
            ("b", HeaderName::ReferredBy),
            ("u", HeaderName::AllowEvents),
            ("x", HeaderName::SessionExpires),
            ("y", HeaderName::Identity),
            ("a", HeaderName::AcceptContact),
            ("j", HeaderName::RejectContact),
            ("d", HeaderName::RequestDisposition),
        ];
        for (compact, header) in pairs {
            assert_eq!(HeaderName::from_bytes(compact.as_bytes()), header);
            assert_eq!(HeaderName::from_bytes(compact.to_uppercase().as_bytes()), header);
            assert_eq!(header.compact_form().map(|c| c.to_string()), Some(compact.to_string()));
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        assert_eq!(HeaderName::from_bytes(b"CONTENT-LENGTH"), HeaderName::ContentLength);
        assert_eq!(HeaderName::from_bytes(b"cseq"), HeaderName::CSeq);
        assert_eq!(
            HeaderName::from_bytes(b"X-Custom"),
            HeaderName::Other("X-CUSTOM".to_string())
        );
    }

    #[test]
    fn test_flags() {
        for h in [
            HeaderName::Via,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
            HeaderName::Route,
            HeaderName::RecordRoute,
        ] {
            assert!(h.is_system(), "{} should be a system header", h);
        }
        assert!(!HeaderName::Contact.is_system());
        assert!(HeaderName::Contact.is_list());
        assert!(!HeaderName::Subject.is_list());
        assert_eq!(HeaderName::Via.kind(), HeaderKind::Via);
        assert_eq!(HeaderName::ContentType.kind(), HeaderKind::Parameterable);
    }

    #[test]
    fn test_wire_name() {
        assert_eq!(HeaderName::Via.wire_name(true), "v");
        assert_eq!(HeaderName::CSeq.wire_name(true), "CSeq");
        assert_eq!(HeaderName::Via.wire_name(false), "Via");
    }
}
