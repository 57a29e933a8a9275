//! # URIs
//!
//! `sip:` and `sips:` URIs (RFC 3261 §19.1) are parsed into [`SipUri`];
//! any other scheme (`tel:`, `urn:`, `http:`) is kept verbatim as
//! [`Uri::Other`].
//!
//! ```rust
//! use siplet_sip_core::Uri;
//!
//! let uri: Uri = "sip:alice:secret@atlanta.com:5070;transport=tcp?subject=hi".parse().unwrap();
//! let sip = uri.as_sip().unwrap();
//! assert_eq!(sip.user(), Some("alice"));
//! assert_eq!(sip.port(), Some(5070));
//! assert_eq!(sip.transport_param(), Some("tcp"));
//! assert_eq!(uri.to_string(), "sip:alice:secret@atlanta.com:5070;transport=tcp?subject=hi");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::param::Parameters;

/// Any URI that can appear in a Request-URI or an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    Sip(SipUri),
    /// Non-SIP URI, kept as written
    Other(String),
}

impl Uri {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let colon = input
            .find(':')
            .ok_or_else(|| Error::InvalidUri(format!("Missing scheme: {}", input)))?;
        let scheme = &input[..colon];
        let scheme_char = |b: u8| b.is_ascii_alphanumeric() || b"+-.".contains(&b);
        if scheme.is_empty() || !scheme.bytes().all(scheme_char) {
            return Err(Error::InvalidUri(format!("Bad scheme: {}", input)));
        }
        if scheme.eq_ignore_ascii_case("sip") || scheme.eq_ignore_ascii_case("sips") {
            SipUri::parse(input).map(Uri::Sip)
        } else if input.bytes().any(|b| b <= b' ') {
            Err(Error::InvalidUri(format!("Whitespace in URI: {}", input)))
        } else {
            Ok(Uri::Other(input.to_string()))
        }
    }

    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            Uri::Other(_) => None,
        }
    }

    pub fn as_sip_mut(&mut self) -> Option<&mut SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            Uri::Other(_) => None,
        }
    }

    pub fn is_sip(&self) -> bool {
        matches!(self, Uri::Sip(_))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => fmt::Display::fmt(uri, f),
            Uri::Other(raw) => f.write_str(raw),
        }
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uri::parse(s)
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

/// A `sip:` or `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    secure: bool,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    params: Parameters,
    headers: Vec<(String, String)>,
}

impl SipUri {
    /// `sip:host` with no user part
    pub fn new(host: impl Into<String>) -> Self {
        SipUri {
            secure: false,
            user: None,
            password: None,
            host: host.into(),
            port: None,
            params: Parameters::new(),
            headers: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (secure, rest) = if input.len() > 5 && input[..5].eq_ignore_ascii_case("sips:") {
            (true, &input[5..])
        } else if input.len() > 4 && input[..4].eq_ignore_ascii_case("sip:") {
            (false, &input[4..])
        } else {
            return Err(Error::InvalidUri(format!("Not a SIP URI: {}", input)));
        };
        if rest.bytes().any(|b| b <= b' ') {
            return Err(Error::InvalidUri(format!("Whitespace in URI: {}", input)));
        }

        let (main, headers) = match rest.split_once('?') {
            Some((main, headers)) => (main, Some(headers)),
            None => (rest, None),
        };
        let (userhost, params) = match main.find(';') {
            Some(idx) => (&main[..idx], &main[idx..]),
            None => (main, ""),
        };
        let (userinfo, hostport) = match userhost.rfind('@') {
            Some(idx) => (Some(&userhost[..idx]), &userhost[idx + 1..]),
            None => (None, userhost),
        };
        let (user, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };
        let (host, port) = parse_hostport(hostport)
            .map_err(|_| Error::InvalidUri(format!("Bad host in {}", input)))?;

        let params = Parameters::parse(params)
            .map_err(|e| Error::InvalidUri(format!("{} in {}", e, input)))?;
        let mut parsed_headers = Vec::new();
        if let Some(headers) = headers {
            for h in headers.split('&').filter(|h| !h.is_empty()) {
                let (name, value) = h.split_once('=').unwrap_or((h, ""));
                parsed_headers.push((name.to_string(), value.to_string()));
            }
        }

        Ok(SipUri {
            secure,
            user,
            password,
            host,
            port,
            params,
            headers: parsed_headers,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: Option<&str>) {
        self.user = user.map(str::to_string);
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Host without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_port(&mut self, port: Option<u16>) {
        self.port = port;
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

    pub fn transport_param(&self) -> Option<&str> {
        self.params.get("transport")
    }

    pub fn maddr_param(&self) -> Option<&str> {
        self.params.get("maddr")
    }

    /// Loose-routing flag (`;lr`)
    pub fn is_loose_route(&self) -> bool {
        self.params.contains("lr")
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: &str, value: Option<&str>) -> Self {
        self.params.set(name, value);
        self
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 references
pub(crate) fn parse_hostport(input: &str) -> Result<(String, Option<u16>)> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Parse("Empty host".to_string()));
    }
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::Parse(format!("Unterminated IPv6 reference: {}", input)))?;
        let host = &rest[..end];
        let after = &rest[end + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p),
            None if after.is_empty() => None,
            None => return Err(Error::Parse(format!("Garbage after host: {}", input))),
        };
        (host, port)
    } else {
        match input.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        }
    };
    if host.is_empty()
        || !host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-._:".contains(&b))
    {
        return Err(Error::Parse(format!("Invalid host: {}", input)));
    }
    let port = match port {
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| Error::Parse(format!("Invalid port: {}", input)))?,
        ),
        None => None,
    };
    Ok((host.to_string(), port))
}

/// Write `host[:port]`, bracketing IPv6 literals
pub(crate) fn write_hostport(
    f: &mut fmt::Formatter<'_>,
    host: &str,
    port: Option<u16>,
) -> fmt::Result {
    if host.contains(':') {
        write!(f, "[{}]", host)?;
    } else {
        f.write_str(host)?;
    }
    if let Some(port) = port {
        write!(f, ":{}", port)?;
    }
    Ok(())
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        write_hostport(f, &self.host, self.port)?;
        write!(f, "{}", self.params)?;
        for (i, (name, value)) in self.headers.iter().enumerate() {
            f.write_str(if i == 0 { "?" } else { "&" })?;
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SipUri::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_uri() {
        let uri = SipUri::parse("sip:registrar.biloxi.com").unwrap();
        assert_eq!(uri.host(), "registrar.biloxi.com");
        assert_eq!(uri.user(), None);
        assert_eq!(uri.port(), None);
        assert_eq!(uri.to_string(), "sip:registrar.biloxi.com");
    }

    #[test]
    fn test_ipv6_host() {
        let uri = SipUri::parse("sips:bob@[2001:db8::10]:5061;lr").unwrap();
        assert!(uri.is_secure());
        assert_eq!(uri.host(), "2001:db8::10");
        assert_eq!(uri.port(), Some(5061));
        assert!(uri.is_loose_route());
        assert_eq!(uri.to_string(), "sips:bob@[2001:db8::10]:5061;lr");
    }

    #[test]
    fn test_other_scheme_kept_verbatim() {
        let uri = Uri::parse("tel:+1-201-555-0123").unwrap();
        assert_eq!(uri, Uri::Other("tel:+1-201-555-0123".to_string()));
        assert!(!uri.is_sip());
    }

    #[test]
    fn test_invalid_uris() {
        assert!(Uri::parse("no-scheme").is_err());
        assert!(SipUri::parse("sip:").is_err());
        assert!(SipUri::parse("sip:host:99999").is_err());
        assert!(SipUri::parse("sip:a b@host").is_err());
    }
}
