//! Error types for Harvester.
//!
//! Library crates use [`HarvesterError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The retry loop in the worker pool classifies errors through
//! [`HarvesterError::is_permanent`]: permanent failures (an identifier that
//! does not exist) are recorded once and never retried, everything external
//! and transient is retried with backoff.

use std::path::PathBuf;

/// Top-level error type for all Harvester operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvesterError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network/HTTP failure during fetch or discovery.
    #[error("network error: {0}")]
    Network(String),

    /// The identifier does not exist at the source (e.g. HTTP 404/410).
    #[error("not found: {identifier}")]
    NotFound { identifier: String },

    /// A circuit breaker is open; the call was rejected without touching
    /// the external dependency.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// A task exceeded its execution deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Shared progress document unreadable or unwritable.
    #[error("coordination error: {0}")]
    Coordination(String),

    /// Content or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (bad unit spec, malformed manifest, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvesterError>;

impl HarvesterError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for an identifier.
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a circuit-open error for a named breaker.
    pub fn circuit_open(breaker: impl Into<String>) -> Self {
        Self::CircuitOpen {
            breaker: breaker.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure is permanent: retrying cannot succeed.
    ///
    /// Permanent failures are recorded immediately and skipped; only
    /// transient failures consume the retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Validation { .. } | Self::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvesterError::config("missing data_dir");
        assert_eq!(err.to_string(), "config error: missing data_dir");

        let err = HarvesterError::not_found("https://example.com/item/9");
        assert!(err.to_string().contains("item/9"));

        let err = HarvesterError::circuit_open("fetch");
        assert_eq!(err.to_string(), "circuit breaker 'fetch' is open");
    }

    #[test]
    fn permanence_classification() {
        assert!(HarvesterError::not_found("x").is_permanent());
        assert!(HarvesterError::validation("bad spec").is_permanent());
        assert!(!HarvesterError::Network("connection reset".into()).is_permanent());
        assert!(!HarvesterError::Timeout(std::time::Duration::from_secs(1)).is_permanent());
        assert!(!HarvesterError::circuit_open("store").is_permanent());
    }
}
