//! Error types for RepoSearch.
//!
//! Library crates use [`RepoSearchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all RepoSearch operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoSearchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// `git` invocation failed (missing binary, clone failure, bad URL).
    #[error("git error: {0}")]
    Git(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The search query was rejected by the full-text engine.
    #[error("invalid search query: {0}")]
    Query(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad repository name, malformed input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTTP server failed to bind or crashed.
    #[error("server error: {0}")]
    Server(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RepoSearchError>;

impl RepoSearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Whether the error was caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Query(_) | Self::Validation { .. })
    }
}
