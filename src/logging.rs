//! Logger setup
//!
//! Four levels: `silent` emits nothing, `error` sends errors only to
//! stderr, `info` adds warnings on stderr and an info stream on stdout,
//! `debug` adds debug output. When a log file is configured every emitted line is also
//! appended to it. `RUST_LOG`, when set, replaces the computed filter.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Diagnostic verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent,
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Silent => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

impl FromStr for LogLevel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(AppError::InvalidInput(format!(
                "unknown log level {other:?}, expected silent, error, info or debug"
            ))),
        }
    }
}

/// Open `path` for appending, creating it and its parent directory.
pub fn open_log_file(path: &Path) -> Result<File, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().append(true).create(true).open(path)?)
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default()
            .add_directive(level.filter().into())
    })
}

/// Install the global tracing subscriber.
///
/// # Errors
/// Fails when the log file cannot be opened.
pub fn init(level: LogLevel, file: Option<&Path>) -> Result<(), AppError> {
    let file_layer = match file {
        Some(path) => {
            let file = Arc::new(open_log_file(path)?);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file),
            )
        }
        None => None,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr.with_max_level(Level::WARN));
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout.with_min_level(Level::INFO));

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to install logger: {e}")))
}
