//! Shared tracing setup for the Mediacast binaries
//!
//! Logs always go to stderr so stdout stays reserved for results (post ids,
//! JSON snapshots) that callers pipe into other tools.
//!
//! # Examples
//!
//! ```no_run
//! use libmediacast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//!
//! // Or honour MEDIACAST_LOG_FORMAT / MEDIACAST_LOG_LEVEL
//! libmediacast::logging::init_default();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain single-line output without target names
    Text,
    /// One JSON object per line, for log shippers
    Json,
    /// Multi-line colored output for local debugging
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` lowers the default level to debug. `RUST_LOG`, when set,
    /// overrides both.
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build from `MEDIACAST_LOG_FORMAT` and `MEDIACAST_LOG_LEVEL`
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("MEDIACAST_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("MEDIACAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::new(format, level, verbose)
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }

    /// Install the global subscriber.
    ///
    /// Returns false if a subscriber was already installed, which happens
    /// when tests or embedding applications set up their own.
    pub fn init(&self) -> bool {
        let filter = self.filter();

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        installed.is_ok()
    }
}

/// Initialize logging from the environment, text format at info by default
pub fn init_default() -> bool {
    LoggingConfig::from_env(false).init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let result = "xml".parse::<LogFormat>();
        assert!(result.unwrap_err().contains("Invalid log format: 'xml'"));
    }

    #[test]
    fn test_log_format_display() {
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_format_and_level() {
        std::env::set_var("MEDIACAST_LOG_FORMAT", "json");
        std::env::set_var("MEDIACAST_LOG_LEVEL", "warn");
        let config = LoggingConfig::from_env(true);
        std::env::remove_var("MEDIACAST_LOG_FORMAT");
        std::env::remove_var("MEDIACAST_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");
        assert!(config.verbose);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_unknown_format() {
        std::env::set_var("MEDIACAST_LOG_FORMAT", "yaml");
        let config = LoggingConfig::from_env(false);
        std::env::remove_var("MEDIACAST_LOG_FORMAT");

        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let config = LoggingConfig::new(LogFormat::Text, "error".to_string(), false);
        config.init();
        assert!(!config.init());
    }
}
