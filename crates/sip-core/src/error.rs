//! Error types for siplet-sip-core

use thiserror::Error;

use crate::types::HeaderName;

/// Result type for SIP core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the message model, the parser helpers and the generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Generic syntax error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Malformed header value
    #[error("Invalid {header} header: {reason}")]
    InvalidHeader {
        /// Header that failed to parse
        header: HeaderName,
        /// What was wrong with it
        reason: String,
    },

    /// Not a valid method token
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Status code outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    /// Contract violation, such as mutating a committed message
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Application attempted to modify a system header
    #[error("{0} is a system header")]
    SystemHeader(HeaderName),

    /// The generator ran out of room in a fixed-capacity buffer
    #[error("Message too long for a {capacity} byte buffer")]
    MessageTooLong {
        /// Capacity of the buffer that overflowed
        capacity: usize,
    },
}

impl Error {
    /// Shorthand for an [`Error::InvalidHeader`]
    pub fn invalid_header(header: HeaderName, reason: impl Into<String>) -> Self {
        Error::InvalidHeader {
            header,
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::IllegalState`]
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Error::IllegalState(reason.into())
    }

    /// True for the generator's overflow signal
    pub fn is_message_too_long(&self) -> bool {
        matches!(self, Error::MessageTooLong { .. })
    }
}
