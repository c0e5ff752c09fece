//! Logging setup for the `ipr` command
//!
//! Console output goes through an [`EnvFilter`], so `RUST_LOG` takes
//! precedence over `--log_level`. A log file can be added, written by a
//! non-blocking worker that is flushed when the [`LoggingGuard`] drops.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Accepted `--log_level` names and the tracing level each maps to
pub const LOG_LEVELS: &[(&str, Level)] = &[
    ("debug", Level::DEBUG),
    ("verbose", Level::DEBUG),
    ("info", Level::INFO),
    ("warning", Level::WARN),
    ("error", Level::ERROR),
    ("critical", Level::ERROR),
];

/// Tracing level for a `--log_level` name
pub fn parse_log_level(name: &str) -> Option<Level> {
    let name = name.to_lowercase();
    LOG_LEVELS
        .iter()
        .find(|(level_name, _)| *level_name == name)
        .map(|(_, level)| *level)
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Console log level
    pub level: Level,
    /// Also write log lines to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_file: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_level_name(name: &str) -> Self {
        Self {
            level: parse_log_level(name).unwrap_or(Level::INFO),
            ..Default::default()
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Keeps the file writer alive, dropping it flushes buffered lines
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    layers.push(Box::new(
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter),
    ));

    let mut file_guard = None;
    if let Some(path) = &config.log_file {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        file_guard = Some(guard);

        let file_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        layers.push(Box::new(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(file_filter),
        ));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
