//! Headers of the form `value *(;param)`, such as Content-Type or Event

use std::fmt;

use crate::error::{Error, Result};
use crate::types::param::Parameters;

/// A primary value followed by parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameterable {
    value: String,
    params: Parameters,
}

impl Parameterable {
    pub fn new(value: impl Into<String>) -> Self {
        Parameterable {
            value: value.into(),
            params: Parameters::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (value, params) = match find_unquoted(input, ';') {
            Some(idx) => (&input[..idx], &input[idx..]),
            None => (input, ""),
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Parse(format!("Missing value in {}", input)));
        }
        Ok(Parameterable {
            value: value.to_string(),
            params: Parameters::parse(params)?,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
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

    pub fn with_param(mut self, name: &str, value: Option<&str>) -> Self {
        self.params.set(name, value);
        self
    }
}

pub(crate) fn find_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

impl fmt::Display for Parameterable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.params)
    }
}
