//! Error types for Thermia
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! follow how the controller reacts to them: configuration problems stop the
//! process at startup, everything else is logged and the next hourly tick
//! tries again.

use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias for Thermia operations
pub type Result<T> = std::result::Result<T, ThermiaError>;

/// Main error type for Thermia
#[derive(Debug, Error)]
pub enum ThermiaError {
    /// Invalid or missing settings
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A single setting failed validation
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Transport level failures (connect, DNS, TLS, body read)
    #[error("Network error: {message}")]
    Network { message: String },

    /// The price feed answered, but not with usable data
    #[error("API error: {message}")]
    Api { message: String },

    /// Relay status or command failures
    #[error("Relay error: {message}")]
    Relay { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// An operation exceeded its time budget
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// No cached price for the requested local date (and hour)
    #[error("No price data available for {date}{}", hour_suffix(.hour))]
    NoPriceData { date: NaiveDate, hour: Option<u32> },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

fn hour_suffix(hour: &Option<u32>) -> String {
    hour.map(|h| format!(" hour {h}")).unwrap_or_default()
}

impl ThermiaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a new relay error
    pub fn relay<S: Into<String>>(message: S) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new no-data error for a local date and hour
    pub const fn no_price_data(date: NaiveDate, hour: u32) -> Self {
        Self::NoPriceData {
            date,
            hour: Some(hour),
        }
    }

    /// Create a new no-data error for a whole local date
    pub const fn no_price_data_for_day(date: NaiveDate) -> Self {
        Self::NoPriceData { date, hour: None }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Startup-fatal errors; all other kinds are recovered within a tick
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Validation { .. })
    }

    /// Failures worth retrying within the same fetch
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

impl From<std::io::Error> for ThermiaError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ThermiaError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::DeError> for ThermiaError {
    fn from(err: quick_xml::DeError) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ThermiaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization {
                message: err.to_string(),
            }
        } else {
            Self::network(err.to_string())
        }
    }
}
