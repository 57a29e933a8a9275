//! CSeq header value: a sequence number and a method

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::method::Method;

/// `CSeq: 314159 INVITE`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let mut parts = input.split_ascii_whitespace();
        let (seq, method) = match (parts.next(), parts.next(), parts.next()) {
            (Some(seq), Some(method), None) => (seq, method),
            _ => return Err(Error::Parse(format!("Bad CSeq: {}", input))),
        };
        let seq = seq
            .parse::<u32>()
            .map_err(|_| Error::Parse(format!("Bad CSeq number: {}", input)))?;
        Ok(CSeq {
            seq,
            method: method.parse()?,
        })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CSeq::parse(s)
    }
}
