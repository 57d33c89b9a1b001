//! Structured logging for Thermia
//!
//! Console and optional daily-rotated file output built on `tracing`, plus
//! small per-component loggers that prefix every line with their context.

mod level;
mod structured;

pub use level::parse_log_level;
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

use crate::config::LoggingConfig;
use crate::error::{Result, ThermiaError};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Keep the non-blocking worker guard alive for the entire process lifetime
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Initialize logging system based on configuration. Only the first call
/// installs a subscriber; later calls return the outcome of the first.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install_subscriber(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(ThermiaError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("thermia={level},reqwest=warn,hyper=warn")
            .to_lowercase()
            .into()
    })
}

fn install_subscriber(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let registry = tracing_subscriber::registry().with(build_env_filter(level));

    let console_layer = config.console_output.then(|| {
        let base = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false);
        if config.json_format {
            base.json().with_filter(LevelFilter::from_level(level)).boxed()
        } else {
            base.with_filter(LevelFilter::from_level(level)).boxed()
        }
    });

    let file_layer = match config.file.as_deref() {
        Some(file) if !file.trim().is_empty() => {
            let appender = rolling::Builder::new()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix("thermia")
                .filename_suffix("log")
                .max_log_files(config.backup_count.max(1) as usize)
                .build(log_directory(Path::new(file)))
                .map_err(|e| {
                    ThermiaError::io(format!("Failed to create log file appender: {e}"))
                })?;
            let (writer, guard) = non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            let base = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            Some(if config.json_format {
                base.json().with_filter(LevelFilter::from_level(level)).boxed()
            } else {
                base.with_filter(LevelFilter::from_level(level)).boxed()
            })
        }
        _ => None,
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ThermiaError::config(format!("Failed to install log subscriber: {e}")))?;

    info!(
        "Logging initialized - level: {:?}, console: {}, file: {}",
        level,
        config.console_output,
        config.file.as_deref().unwrap_or("-")
    );
    Ok(())
}

// A path with an extension names a file; its parent is the log directory.
fn log_directory(path: &Path) -> &Path {
    if path.extension().is_some() {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    } else {
        path
    }
}
