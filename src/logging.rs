//! Tracing subscriber setup for the binary.

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_NAME: &str = "feedstream.log";

/// Installs the global subscriber. When a log directory is configured, output
/// goes to a daily rolling file through a non-blocking writer; the returned
/// guard must be held until shutdown or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    LogTracer::init().map_err(|e| Error::Config(format!("Failed to initialize log tracer: {}", e)))?;

    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    match &config.directory {
        Some(directory) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, directory, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .compact()
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))?;
            Ok(None)
        }
    }
}
