//! Ordered `;name[=value]` parameter lists shared by URIs, addresses, Via
//! and parameterable headers.

use std::fmt;

use crate::error::{Error, Result};
use crate::grammar;

/// Parameters in insertion order; names compare case-insensitively.
///
/// A flag parameter (`;lr`) is stored with a `None` value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Parameters(Vec<(String, Option<String>)>);

impl Parameters {
    pub fn new() -> Self {
        Parameters(Vec::new())
    }

    /// Parse `;a=b;c` (the leading `;` is optional).
    ///
    /// Quoted values keep their quotes so the list re-serializes unchanged.
    pub fn parse(input: &str) -> Result<Self> {
        let mut params = Parameters::new();
        let input = input.trim();
        let input = input.strip_prefix(';').unwrap_or(input);
        if input.trim().is_empty() {
            return Ok(params);
        }
        for part in split_params(input) {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Parse(format!("Empty parameter in {}", input)));
            }
            match part.split_once('=') {
                Some((name, value)) => {
                    let name = name.trim();
                    if !grammar::is_token(name) {
                        return Err(Error::Parse(format!("Invalid parameter name: {}", name)));
                    }
                    params.0.push((name.to_string(), Some(value.trim().to_string())));
                }
                None => {
                    if !grammar::is_token(part) {
                        return Err(Error::Parse(format!("Invalid parameter name: {}", part)));
                    }
                    params.0.push((part.to_string(), None));
                }
            }
        }
        Ok(params)
    }

    /// Value of `name`; a flag parameter yields `Some("")`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Replace or append `name`; `None` makes it a flag
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(str::to_string);
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<String>> {
        let idx = self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split on `;` outside quoted strings
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let p = Parameters::parse(";branch=z9hG4bK776;lr;received=10.0.0.1").unwrap();
        assert_eq!(p.get("branch"), Some("z9hG4bK776"));
        assert_eq!(p.get("LR"), Some(""));
        assert_eq!(p.get("missing"), None);
        assert_eq!(p.to_string(), ";branch=z9hG4bK776;lr;received=10.0.0.1");
    }

    #[test]
    fn test_quoted_semicolon() {
        let p = Parameters::parse("q=\"a;b\";x=1").unwrap();
        assert_eq!(p.get("q"), Some("\"a;b\""));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_set_and_remove() {
        let mut p = Parameters::new();
        p.set("tag", Some("1"));
        p.set("TAG", Some("2"));
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("tag"), Some("2"));
        assert_eq!(p.remove("tag"), Some(Some("2".to_string())));
        assert!(p.is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Parameters::parse(";;").is_err());
        assert!(Parameters::parse(";a b=1").is_err());
        assert!(Parameters::parse("").unwrap().is_empty());
    }
}
