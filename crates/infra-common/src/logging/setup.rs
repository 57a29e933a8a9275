use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::types::{Error, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open and close events
    pub log_spans: bool,
    /// Application name logged at startup
    pub app_name: String,
    /// Extra filter directives, e.g. `siplet_transaction_core=trace`
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "siplet".to_string(),
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Filter for this configuration. `RUST_LOG` wins over the level when set.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));
        for directive in &self.directives {
            let parsed = directive.parse::<Directive>().map_err(|e| {
                Error::Config(format!("Invalid log directive '{}': {}", directive, e))
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber.
///
/// Fails with [`Error::Logging`] if a subscriber is already installed, so
/// tests may call it repeatedly and ignore the result.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Logging(e.to_string()))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(Error::Config(_))));
    }

    #[test]
    fn test_builders() {
        let config = LoggingConfig::new(Level::DEBUG, "siplet-test")
            .with_json()
            .with_file_info()
            .with_directive("siplet_sip_core=trace");
        assert!(config.json && config.file_info && !config.log_spans);
        assert_eq!(config.directives, vec!["siplet_sip_core=trace".to_string()]);
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_bad_directive_rejected() {
        let config = LoggingConfig::default().with_directive("siplet=notalevel");
        assert!(matches!(config.env_filter(), Err(Error::Config(_))));
    }

    #[test]
    fn test_second_setup_fails_cleanly() {
        let _ = setup_logging(LoggingConfig::default());
        assert!(matches!(setup_logging(LoggingConfig::default()), Err(Error::Logging(_))));
    }
}
