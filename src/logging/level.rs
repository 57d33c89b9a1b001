use crate::error::{Result, ThermiaError};
use tracing::Level;

/// Parse a configured level name. Accepts the Python-style aliases the
/// deployment configs have always used (`WARNING`, `CRITICAL`).
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        _ => Err(ThermiaError::config(format!(
            "Invalid log level: {level_str}"
        ))),
    }
}
