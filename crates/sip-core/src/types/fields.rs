//! # Header fields
//!
//! [`Fields`] is the ordered multi-map holding a message's headers. Each
//! header name appears once, in first-insertion order, and owns the chain of
//! its values in insertion order. Via, Route and Record-Route chains are
//! order significant: the first value is the top-most entry.
//!
//! Values are typed by [`HeaderValue`], one variant per header class. Copying
//! a value between messages is a deep `clone()`.
//!
//! ```rust
//! use siplet_sip_core::{Fields, HeaderName, HeaderValue};
//!
//! let mut fields = Fields::new();
//! fields.add(HeaderName::Supported, HeaderValue::text("100rel"));
//! fields.add(HeaderName::Supported, HeaderValue::text("timer"));
//! fields.add(HeaderName::Subject, HeaderValue::text("lunch"));
//!
//! let supported: Vec<String> = fields
//!     .get_all(&HeaderName::Supported)
//!     .iter()
//!     .map(|v| v.to_string())
//!     .collect();
//! assert_eq!(supported, ["100rel", "timer"]);
//! assert_eq!(fields.text(&HeaderName::Subject), Some("lunch"));
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::types::address::Address;
use crate::types::header_name::{HeaderKind, HeaderName};
use crate::types::parameterable::Parameterable;
use crate::types::via::Via;

/// A typed header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Via(Via),
    Address(Address),
    Parameterable(Parameterable),
}

impl HeaderValue {
    pub fn text(value: impl Into<String>) -> Self {
        HeaderValue::Text(value.into())
    }

    /// Parse `raw` according to the value class of `name`
    pub fn parse(name: &HeaderName, raw: &str) -> Result<Self> {
        let invalid = |e: Error| Error::invalid_header(name.clone(), e.to_string());
        match name.kind() {
            HeaderKind::Text => Ok(HeaderValue::Text(raw.trim().to_string())),
            HeaderKind::Via => Via::parse(raw).map(HeaderValue::Via).map_err(invalid),
            HeaderKind::Address => Address::parse(raw).map(HeaderValue::Address).map_err(invalid),
            HeaderKind::Parameterable => Parameterable::parse(raw)
                .map(HeaderValue::Parameterable)
                .map_err(invalid),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_via(&self) -> Option<&Via> {
        match self {
            HeaderValue::Via(via) => Some(via),
            _ => None,
        }
    }

    pub fn as_via_mut(&mut self) -> Option<&mut Via> {
        match self {
            HeaderValue::Via(via) => Some(via),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            HeaderValue::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn as_address_mut(&mut self) -> Option<&mut Address> {
        match self {
            HeaderValue::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn as_parameterable(&self) -> Option<&Parameterable> {
        match self {
            HeaderValue::Parameterable(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(text) => f.write_str(text),
            HeaderValue::Via(via) => fmt::Display::fmt(via, f),
            HeaderValue::Address(address) => fmt::Display::fmt(address, f),
            HeaderValue::Parameterable(p) => fmt::Display::fmt(p, f),
        }
    }
}

impl From<Via> for HeaderValue {
    fn from(via: Via) -> Self {
        HeaderValue::Via(via)
    }
}

impl From<Address> for HeaderValue {
    fn from(address: Address) -> Self {
        HeaderValue::Address(address)
    }
}

impl From<Parameterable> for HeaderValue {
    fn from(p: Parameterable) -> Self {
        HeaderValue::Parameterable(p)
    }
}

impl From<&str> for HeaderValue {
    fn from(text: &str) -> Self {
        HeaderValue::Text(text.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(text: String) -> Self {
        HeaderValue::Text(text)
    }
}

/// Ordered header multi-map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl Fields {
    pub fn new() -> Self {
        Fields::default()
    }

    fn position(&self, name: &HeaderName) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// First (top-most) value of `name`
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.get_all(name).first()
    }

    pub fn get_mut(&mut self, name: &HeaderName) -> Option<&mut HeaderValue> {
        let idx = self.position(name)?;
        self.entries[idx].1.first_mut()
    }

    /// All values of `name`, top-most first
    pub fn get_all(&self, name: &HeaderName) -> &[HeaderValue] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    pub fn get_all_mut(&mut self, name: &HeaderName) -> Option<&mut Vec<HeaderValue>> {
        let idx = self.position(name)?;
        Some(&mut self.entries[idx].1)
    }

    /// First value of `name` when it is plain text
    pub fn text(&self, name: &HeaderName) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_text)
    }

    pub fn address(&self, name: &HeaderName) -> Option<&Address> {
        self.get(name).and_then(HeaderValue::as_address)
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.position(name).is_some()
    }

    /// Append `value` to the end of the chain for `name`
    pub fn add(&mut self, name: HeaderName, value: HeaderValue) {
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Insert `value` at the top of the chain for `name`
    pub fn add_first(&mut self, name: HeaderName, value: HeaderValue) {
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.insert(0, value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replace every value of `name` with `value`, keeping its position
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replace the whole chain for `name`; an empty chain removes the header
    pub fn set_all(&mut self, name: HeaderName, values: Vec<HeaderValue>) {
        if values.is_empty() {
            self.remove(&name);
            return;
        }
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = values,
            None => self.entries.push((name, values)),
        }
    }

    pub fn remove(&mut self, name: &HeaderName) -> Option<Vec<HeaderValue>> {
        let idx = self.position(name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Remove the top-most value of `name`
    pub fn remove_first(&mut self, name: &HeaderName) -> Option<HeaderValue> {
        let idx = self.position(name)?;
        let value = self.entries[idx].1.remove(0);
        if self.entries[idx].1.is_empty() {
            self.entries.remove(idx);
        }
        Some(value)
    }

    /// Copy every value of `name` from `other`, replacing ours
    pub fn copy_from(&mut self, other: &Fields, name: &HeaderName) {
        let values = other.get_all(name).to_vec();
        self.set_all(name.clone(), values);
    }

    /// Header names in order
    pub fn names(&self) -> impl Iterator<Item = &HeaderName> {
        self.entries.iter().map(|(n, _)| n)
    }

    /// Every header chain in order
    pub fn chains(&self) -> impl Iterator<Item = (&HeaderName, &[HeaderValue])> {
        self.entries.iter().map(|(n, v)| (n, v.as_slice()))
    }

    /// Every (name, value) pair, chain by chain
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries
            .iter()
            .flat_map(|(n, values)| values.iter().map(move |v| (n, v)))
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn via(branch: &str) -> HeaderValue {
        HeaderValue::parse(&HeaderName::Via, &format!("SIP/2.0/UDP h;branch={}", branch)).unwrap()
    }

    #[test]
    fn test_chain_order() {
        let mut fields = Fields::new();
        fields.add(HeaderName::Via, via("z9hG4bK2"));
        fields.add(HeaderName::CallId, "abc".into());
        fields.add(HeaderName::Via, via("z9hG4bK3"));
        fields.add_first(HeaderName::Via, via("z9hG4bK1"));

        let branches: Vec<_> = fields
            .get_all(&HeaderName::Via)
            .iter()
            .filter_map(|v| v.as_via().and_then(|v| v.branch()))
            .collect();
        assert_eq!(branches, ["z9hG4bK1", "z9hG4bK2", "z9hG4bK3"]);

        let names: Vec<_> = fields.names().cloned().collect();
        assert_eq!(names, [HeaderName::Via, HeaderName::CallId]);
    }

    #[test]
    fn test_remove_first_drops_empty_chain() {
        let mut fields = Fields::new();
        fields.add(HeaderName::Via, via("z9hG4bK1"));
        assert!(fields.remove_first(&HeaderName::Via).is_some());
        assert!(!fields.contains(&HeaderName::Via));
        assert!(fields.remove_first(&HeaderName::Via).is_none());
    }

    #[test]
    fn test_set_keeps_position() {
        let mut fields = Fields::new();
        fields.add(HeaderName::Subject, "a".into());
        fields.add(HeaderName::Expires, "60".into());
        fields.set(HeaderName::Subject, "b".into());
        let pairs: Vec<_> = fields.iter().map(|(n, v)| format!("{}: {}", n, v)).collect();
        assert_eq!(pairs, ["Subject: b", "Expires: 60"]);
    }

    #[test]
    fn test_typed_parse_error_names_header() {
        let err = HeaderValue::parse(&HeaderName::From, "<sip:broken").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { header: HeaderName::From, .. }));
    }

    #[test]
    fn test_copy_is_deep() {
        let mut a = Fields::new();
        a.add(
            HeaderName::RecordRoute,
            HeaderValue::parse(&HeaderName::RecordRoute, "<sip:p1;lr>").unwrap(),
        );
        let mut b = Fields::new();
        b.copy_from(&a, &HeaderName::RecordRoute);
        if let Some(HeaderValue::Address(addr)) = b.get_mut(&HeaderName::RecordRoute) {
            addr.set_tag("x");
        }
        assert_eq!(a.address(&HeaderName::RecordRoute).unwrap().tag(), None);
        assert_eq!(b.address(&HeaderName::RecordRoute).unwrap().tag(), Some("x"));
    }
}
