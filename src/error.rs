//! Error types for the schema cache server.
//!
//! Errors follow one rule: per-table problems are absorbed and recorded,
//! directory-level and configuration problems are surfaced with enough context
//! (database name, underlying cause) for the caller to act on.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// Domain-specific errors for the schema cache server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (duplicate or missing database, missing source settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database name not registered
    #[error("Database '{name}' not found. Available databases: {}", format_available(.available))]
    DatabaseNotFound { name: String, available: Vec<String> },

    /// Metadata source could not be reached
    #[error("Metadata source unavailable: {message}")]
    SourceUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Metadata source refused the introspection query
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Persisted cache could not be read back
    #[error("Corrupt schema cache at {}: {message}", .path.display())]
    CacheCorruption { path: PathBuf, message: String },

    /// Directory-level failure while building a schema index
    #[error("Schema index build failed for '{database}': {source}")]
    BuildFailed {
        database: String,
        #[source]
        source: Box<ServerError>,
    },

    /// No cache has been built for the database yet
    #[error("Schema cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Filesystem error while persisting or loading a cache
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "(none configured)".to_string()
    } else {
        available.join(", ")
    }
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a database-not-found error listing the configured names.
    pub fn database_not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::DatabaseNotFound {
            name: name.into(),
            available,
        }
    }

    /// Create a source-unavailable error.
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a source-unavailable error with an underlying cause.
    pub fn source_unavailable_with(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a cache corruption error.
    pub fn cache_corruption(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::CacheCorruption {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a directory-level failure for a database build.
    pub fn build_failed(database: impl Into<String>, source: ServerError) -> Self {
        Self::BuildFailed {
            database: database.into(),
            source: Box::new(source),
        }
    }

    /// Create a cache-unavailable error.
    pub fn cache_unavailable(database: impl Into<String>) -> Self {
        Self::CacheUnavailable(format!(
            "no schema cache has been built for '{}'",
            database.into()
        ))
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. } => true,
            Self::BuildFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Check if this error is a not-found outcome rather than a system failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DatabaseNotFound { .. })
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check DB_NAMES and the per-database DB_<NAME>_* variables"),
            Self::DatabaseNotFound { .. } => Some("Use one of the configured database names"),
            Self::SourceUnavailable { .. } => {
                Some("Check connectivity to the database and retry the rebuild")
            }
            Self::PermissionDenied(_) => {
                Some("Grant the account read access to the data dictionary views")
            }
            Self::BuildFailed { .. } => Some("The previous cache is still served; retry later"),
            Self::CacheUnavailable(_) => Some("Run rebuild_schema_cache for this database"),
            _ => None,
        }
    }
}
