// src/error.rs

//! Unified error handling for the mirror monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// One failed connection attempt, kept for the aggregate failover error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    /// Human-readable pass description (endpoint and credential, no secret)
    pub pass: String,
    /// Underlying failure reason
    pub reason: String,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection with {}\n{}", self.pass, self.reason)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regular expression failed to compile
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Cron expression parsing failed
    #[error("Cron expression error: {0}")]
    Cron(#[from] cron::error::Error),

    /// Network or authentication failure on a single pass
    #[error("Connection error for {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Every pass of a mirror was tried and failed
    #[error(
        "All {count} passes failed for mirror {mirror}:\n{details}",
        count = .attempts.len(),
        details = format_attempts(.attempts)
    )]
    AllPassesFailed {
        mirror: String,
        attempts: Vec<FailedAttempt>,
    },

    /// An operation exceeded the endpoint's acceptable lag
    #[error("Timed out after {lag_ms} ms: {context}")]
    Timeout { context: String, lag_ms: u64 },

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },

    /// Mirror identity requested before any successful connection
    #[error("Mirror {0} has never been connected")]
    NotConnected(String),

    /// Delta could not be replayed
    #[error("Delta error: {0}")]
    Delta(String),

    /// Document store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

fn format_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl AppError {
    /// Create a connection error for an endpoint.
    pub fn connection(endpoint: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, lag_ms: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            lag_ms,
        }
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a delta replay error.
    pub fn delta(message: impl Into<String>) -> Self {
        Self::Delta(message.into())
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error should count as a failed attempt in pass failover.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Http(_)
        )
    }
}
