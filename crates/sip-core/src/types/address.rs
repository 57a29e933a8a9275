//! # Addresses
//!
//! `name-addr` and `addr-spec` values used by From, To, Contact, Route,
//! Record-Route and friends: an optional display name, a URI and header
//! parameters such as `tag` or `expires`.
//!
//! Addresses are plain owned values. Copying one into another message is a
//! `clone()`, so header edits on one message never show up in another.
//!
//! ```rust
//! use siplet_sip_core::Address;
//!
//! let mut to: Address = "\"Bob\" <sip:bob@biloxi.com>".parse().unwrap();
//! assert_eq!(to.display_name(), Some("Bob"));
//! to.set_tag("a6c85cf");
//! assert_eq!(to.to_string(), "Bob <sip:bob@biloxi.com>;tag=a6c85cf");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::grammar;
use crate::types::param::Parameters;
use crate::types::parameterable::find_unquoted;
use crate::types::uri::Uri;

/// A display name, URI and header parameters, or the Contact wildcard `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    display_name: Option<String>,
    uri: Option<Uri>,
    params: Parameters,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri: Some(uri),
            params: Parameters::new(),
        }
    }

    /// The `Contact: *` wildcard
    pub fn wildcard() -> Self {
        Address {
            display_name: None,
            uri: None,
            params: Parameters::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input == "*" {
            return Ok(Address::wildcard());
        }

        let (display_name, rest) = if input.starts_with('"') {
            let end = closing_quote(input)
                .ok_or_else(|| Error::Parse(format!("Unterminated display name: {}", input)))?;
            (Some(grammar::unquote(&input[..=end])), input[end + 1..].trim_start())
        } else if let Some(lt) = find_unquoted(input, '<') {
            let name = input[..lt].trim();
            ((!name.is_empty()).then(|| name.to_string()), &input[lt..])
        } else {
            (None, input)
        };

        if let Some(inner) = rest.strip_prefix('<') {
            let gt = inner
                .find('>')
                .ok_or_else(|| Error::Parse(format!("Missing '>' in {}", input)))?;
            let uri = Uri::parse(&inner[..gt])?;
            let params = inner[gt + 1..].trim();
            if !params.is_empty() && !params.starts_with(';') {
                return Err(Error::Parse(format!("Garbage after '>' in {}", input)));
            }
            Ok(Address {
                display_name,
                uri: Some(uri),
                params: Parameters::parse(params)?,
            })
        } else {
            if display_name.is_some() {
                return Err(Error::Parse(format!("Display name without '<': {}", input)));
            }
            // addr-spec: parameters after the URI belong to the header
            let (uri, params) = match rest.find(';') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            Ok(Address {
                display_name: None,
                uri: Some(Uri::parse(uri)?),
                params: Parameters::parse(params)?,
            })
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.uri.is_none()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: Option<&str>) {
        self.display_name = name.map(str::to_string);
    }

    /// URI of the address; `None` only for the wildcard
    pub fn uri(&self) -> Option<&Uri> {
        self.uri.as_ref()
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = Some(uri);
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

    pub fn tag(&self) -> Option<&str> {
        self.params.get("tag").filter(|t| !t.is_empty())
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.params.set("tag", Some(tag));
    }

    pub fn remove_tag(&mut self) {
        self.params.remove("tag");
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.set_tag(tag);
        self
    }
}

fn closing_quote(input: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(i);
        }
    }
    None
}

/// Display names made of single-space separated tokens go out unquoted
fn is_token_sequence(name: &str) -> bool {
    name.split(' ').all(grammar::is_token)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = match &self.uri {
            Some(uri) => uri,
            None => return f.write_str("*"),
        };
        match self.display_name.as_deref() {
            Some(name) if is_token_sequence(name) => write!(f, "{} ", name)?,
            Some(name) => write!(f, "{} ", grammar::quote(name))?,
            None => {}
        }
        write!(f, "<{}>{}", uri, self.params)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl From<Uri> for Address {
    fn from(uri: Uri) -> Self {
        Address::new(uri)
    }
}
