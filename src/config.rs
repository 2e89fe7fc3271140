//! Configuration management for the schema cache server.
//!
//! Configuration is loaded from environment variables. `Config::from_vars`
//! takes a lookup function so it can be exercised without touching the
//! process environment.
//!
//! Multi-database layout:
//!
//! ```text
//! DB_NAMES=hr,sales
//! DB_HR_METADATA_FILE=/etc/schemas/hr.json
//! DB_HR_SCHEMA=HR
//! DB_SALES_METADATA_FILE=/etc/schemas/sales.json
//! ```
//!
//! Without `DB_NAMES`, `METADATA_FILE` (and optionally `TARGET_SCHEMA`)
//! configure a single database named `default`.

use crate::constants::{
    DEFAULT_CACHE_DIR, DEFAULT_DATABASE_NAME, DEFAULT_DRAIN_TIMEOUT, DEFAULT_RETRY_INITIAL_DELAY,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY,
};
use crate::error::{Result, ServerError};
use crate::shutdown::ShutdownConfig;
use crate::source::RetryConfig;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Every declared database name, valid or not, in declaration order.
    pub declared: Vec<String>,

    /// Databases with a complete configuration, in declaration order.
    pub databases: Vec<DatabaseConfig>,

    /// Declared databases whose configuration is incomplete.
    pub invalid: Vec<InvalidDatabase>,

    /// Cache persistence settings
    pub cache: CacheConfig,

    /// Retry policy for metadata source calls
    pub retry: RetryConfig,

    /// Shutdown behavior
    pub shutdown: ShutdownConfig,
}

/// One configured database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Name used in tool calls
    pub name: String,

    /// JSON schema snapshot read by the metadata source
    pub metadata_file: PathBuf,

    /// Owning schema, reported in status output
    pub schema: Option<String>,
}

/// A declared database that could not be configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDatabase {
    pub name: String,
    pub reason: String,
}

/// Cache persistence settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `<name>_schema_cache.json` files
    pub dir: PathBuf,

    /// Fetch full metadata for every table when building at startup
    pub fetch_all_on_startup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            fetch_all_on_startup: false,
        }
    }
}

/// Environment variable prefix for a database name.
pub fn env_prefix(name: &str) -> String {
    let upper: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("DB_{}", upper)
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut declared = Vec::new();
        let mut databases = Vec::new();
        let mut invalid = Vec::new();

        match get("DB_NAMES") {
            Some(names) => {
                let mut seen = HashSet::new();
                for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    if !seen.insert(name.to_string()) {
                        return Err(ServerError::config(format!(
                            "database '{}' is listed more than once in DB_NAMES",
                            name
                        )));
                    }

                    declared.push(name.to_string());
                    let prefix = env_prefix(name);
                    let file_var = format!("{}_METADATA_FILE", prefix);
                    match get(&file_var) {
                        Some(file) => databases.push(DatabaseConfig {
                            name: name.to_string(),
                            metadata_file: PathBuf::from(file),
                            schema: get(&format!("{}_SCHEMA", prefix)),
                        }),
                        None => invalid.push(InvalidDatabase {
                            name: name.to_string(),
                            reason: format!("{} is not set", file_var),
                        }),
                    }
                }

                if databases.is_empty() && invalid.is_empty() {
                    return Err(ServerError::config("DB_NAMES lists no databases"));
                }
            }
            None => {
                let file = get("METADATA_FILE").ok_or_else(|| {
                    ServerError::config("set DB_NAMES or METADATA_FILE to configure a database")
                })?;
                declared.push(DEFAULT_DATABASE_NAME.to_string());
                databases.push(DatabaseConfig {
                    name: DEFAULT_DATABASE_NAME.to_string(),
                    metadata_file: PathBuf::from(file),
                    schema: get("TARGET_SCHEMA"),
                });
            }
        }

        let cache = CacheConfig {
            dir: get("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            fetch_all_on_startup: get("SCHEMA_FETCH_ALL_ON_STARTUP")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
        };

        let retry = RetryConfig {
            max_attempts: get("SCHEMA_RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
            initial_delay: get("SCHEMA_RETRY_INITIAL_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_INITIAL_DELAY),
            max_delay: get("SCHEMA_RETRY_MAX_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            ..RetryConfig::default()
        };

        let shutdown = ShutdownConfig {
            drain_timeout: get("SCHEMA_SHUTDOWN_DRAIN_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT),
            flush_caches: get("SCHEMA_SHUTDOWN_FLUSH_CACHE")
                .map(|v| parse_bool(&v))
                .unwrap_or(true),
        };

        Ok(Self {
            declared,
            databases,
            invalid,
            cache,
            retry,
            shutdown,
        })
    }

    /// Names of the usable databases, in declaration order.
    pub fn database_names(&self) -> Vec<&str> {
        self.databases.iter().map(|d| d.name.as_str()).collect()
    }
}
