//! Logging configuration for the SNMP simulator
//!
//! Simulation rigs often run several simulator nodes on one host, so file
//! logs are prefixed with the node id from the general config. The returned
//! guard must stay alive for the duration of the process or buffered file
//! output is lost.

use std::path::Path;

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{GeneralConfig, LogFormat, LoggingConfig};
use crate::Result;

/// Setup logging based on configuration
pub fn setup_logging(general: &GeneralConfig, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match &config.file {
        Some(file_path) => {
            // One rotated file per simulator node
            let directory = Path::new(file_path)
                .parent()
                .ok_or_else(|| crate::Error::parse("Invalid log file path"))?;

            let file_appender = rolling::RollingFileAppender::builder()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(general.node_id.as_str())
                .filename_suffix("log")
                .build(directory)
                .map_err(|e| {
                    crate::Error::internal(format!("Failed to create file appender: {}", e))
                })?;

            let (file_writer, file_guard) = non_blocking(file_appender);

            let file_layer = match config.format {
                LogFormat::Json => fmt::layer().json().with_writer(file_writer).boxed(),
                LogFormat::Compact => fmt::layer().compact().with_writer(file_writer).boxed(),
                LogFormat::Full => fmt::layer().with_writer(file_writer).boxed(),
            };

            // Console logging
            let console_layer = match config.format {
                LogFormat::Json => fmt::layer().json().with_writer(std::io::stdout).boxed(),
                LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stdout).boxed(),
                LogFormat::Full => fmt::layer().with_writer(std::io::stdout).boxed(),
            };

            registry.with(file_layer).with(console_layer).init();
            Some(file_guard)
        }
        None => {
            // Console logging only
            let console_layer = match config.format {
                LogFormat::Json => fmt::layer().json().boxed(),
                LogFormat::Compact => fmt::layer().compact().boxed(),
                LogFormat::Full => fmt::layer().boxed(),
            };

            registry.with(console_layer).init();
            None
        }
    };

    info!(node_id = %general.node_id, "Logging initialized with level: {}", config.level);
    Ok(guard)
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(crate::Error::parse("Invalid log level")),
    }
}
