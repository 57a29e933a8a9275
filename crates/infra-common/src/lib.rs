//! # siplet-infra-common
//!
//! Infrastructure shared across the siplet crates: `tracing` subscriber
//! setup and the errors it reports.

pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
pub use logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
