//! Tracing setup for shells embedding the session core
//!
//! The library itself only emits `tracing` events. An embedding application
//! calls `init_logging` once to install a single fmt layer (json or pretty)
//! that writes to stdout or appends to `file_path`. `RUST_LOG` takes
//! precedence over the configured level.

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;
use crate::types::ParticipantId;

/// Output format of the installed fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(format: &str) -> anyhow::Result<Self> {
        match format.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {format}")),
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails on an unknown level or format, an unwritable log file, or when a
/// global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let format = LogFormat::parse(&config.format)?;
    let to_file = config.file_path.is_some();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let writer = log_writer(config.file_path.as_deref())?;

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_line_number(true)
            .with_writer(writer)
            .boxed(),
        // no escape codes in log files
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(!to_file)
            .with_span_events(FmtSpan::CLOSE)
            .with_file(false)
            .with_line_number(true)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .try_init()?;
    Ok(())
}

fn log_writer(file_path: Option<&str>) -> io::Result<BoxMakeWriter> {
    match file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
        None => Ok(BoxMakeWriter::new(io::stdout)),
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

/// Span covering everything one session does, keyed by the local participant
#[must_use]
pub fn session_span(local_id: &ParticipantId) -> tracing::Span {
    tracing::info_span!("session", local_id = %local_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("INFO").is_ok());
        assert!(parse_log_level("warning").is_ok());
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_init_rejects_invalid_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_log_format() {
        assert_eq!(LogFormat::parse("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::parse("xml").is_err());

        let config = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_file_writer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.log");

        log_writer(path.to_str()).unwrap();
        assert!(path.exists());

        let missing = dir.path().join("missing").join("huddle.log");
        assert!(log_writer(missing.to_str()).is_err());
    }
}
