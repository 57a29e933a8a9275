use thiserror::Error;

use crate::transaction::TransactionKey;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP transaction handling
#[derive(Error, Debug)]
pub enum Error {
    /// Operation not allowed in the current state: sending through a
    /// terminated transaction, cancelling after a final response, reusing a
    /// terminated dialog.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// No transaction with this key in the call session
    #[error("Transaction not found: {0}")]
    NoSuchTransaction(TransactionKey),

    /// Top Via branch missing or not RFC 3261 compliant
    #[error("Invalid branch: {0}")]
    InvalidBranch(String),

    /// A header the transaction layer relies on is missing
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// Error originating from the sip-transport crate
    #[error("SIP transport error: {0}")]
    Transport(#[from] siplet_sip_transport::Error),

    /// Error originating from the sip-core crate
    #[error("SIP core error: {0}")]
    Sip(#[from] siplet_sip_core::Error),

    /// Rejected configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(msg.into())
    }

    /// True when a message did not fit the connection's size limit
    pub fn is_message_too_long(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_message_too_long(),
            Error::Sip(e) => e.is_message_too_long(),
            _ => false,
        }
    }
}
