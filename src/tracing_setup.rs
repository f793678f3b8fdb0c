//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; binaries and tests decide where they
//! go. [`init`] installs a `tracing-subscriber` registry with an [`EnvFilter`]
//! (`RUST_LOG` wins over the configured level) and one formatting layer.
//!
//! ```no_run
//! use rust_acq::tracing_setup::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), String> {
//! tracing_setup::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!(instrument = "CTD 42", "Acquisition started");
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    pub format: OutputFormat,
    /// Log span NEW/CLOSE events
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    /// Reader threads are named `reader-<instrument>`, so names are on by default
    pub with_thread_names: bool,
    /// Colors, Pretty format only
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Build from textual level and format, as given on the command line.
    pub fn parse(level: &str, format: &str) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(level)?).with_format(format.parse()?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: when a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())` and leaves it in place.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let result = match config.format {
        OutputFormat::Pretty => tracing_subscriber::registry()
            .with(base.pretty().with_ansi(config.with_ansi).with_filter(env_filter))
            .try_init(),
        OutputFormat::Compact => tracing_subscriber::registry()
            .with(base.compact().with_ansi(false).with_filter(env_filter))
            .try_init(),
        OutputFormat::Json => tracing_subscriber::registry()
            .with(base.json().with_filter(env_filter))
            .try_init(),
    };
    result.map_err(|e: TryInitError| format!("Failed to initialize tracing: {e}"))
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("warn"), Ok(Level::WARN));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_cli_settings() {
        let config = TracingConfig::parse("error", "JSON").unwrap();
        assert_eq!(config.level, Level::ERROR);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(TracingConfig::parse("info", "xml").is_err());
    }
}
