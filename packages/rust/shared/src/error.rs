//! Error types for PriceWatch.
//!
//! Library crates use [`PriceWatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PriceWatch operations.
#[derive(Debug, thiserror::Error)]
pub enum PriceWatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Outbound page retrieval failed (network, DNS, timeout, non-2xx).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The fetched page could not be parsed as an HTML document.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error. Any open transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    /// A requested record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad URL, out-of-range parameter, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PriceWatchError>;

impl PriceWatchError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A missing record of the given kind.
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Whether the failure came from the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PriceWatchError::config("port must be non-zero");
        assert_eq!(err.to_string(), "config error: port must be non-zero");

        let err = PriceWatchError::not_found("product", 42);
        assert_eq!(err.to_string(), "product 42 not found");

        let err = PriceWatchError::Fetch("https://shop.example/p: HTTP 503".into());
        assert!(err.to_string().starts_with("fetch error:"));
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(PriceWatchError::validation("bad url").is_client_error());
        assert!(PriceWatchError::not_found("product", 1).is_client_error());
        assert!(!PriceWatchError::Storage("disk full".into()).is_client_error());
        assert!(!PriceWatchError::Cancelled.is_client_error());
    }
}
