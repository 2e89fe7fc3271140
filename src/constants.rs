//! Centralized constants for the schema cache server.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Cache Constants
// =============================================================================

/// Default directory for persisted schema caches.
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Suffix appended to the sanitized database name to form its cache file name.
pub const CACHE_FILE_SUFFIX: &str = "_schema_cache.json";

/// Name given to the database registered by the single-database fallback.
pub const DEFAULT_DATABASE_NAME: &str = "default";

// =============================================================================
// Search Constants
// =============================================================================

/// Maximum number of tables returned by a table-name search.
pub const MAX_TABLE_SEARCH_RESULTS: usize = 20;

/// Maximum number of tables returned by a column search.
pub const MAX_COLUMN_SEARCH_TABLES: usize = 50;

/// Maximum number of tables accepted by a batch schema request.
pub const MAX_BATCH_TABLES: usize = 50;

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of attempts for a metadata source call.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(200);

/// Upper bound for the delay between retries.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Backoff multiplier applied per attempt.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Default time allowed for in-flight tool calls to finish on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Logging Constants
// =============================================================================

/// Maximum length of tool arguments echoed into debug logs.
pub const LOG_ARGUMENT_PREVIEW_LEN: usize = 200;
