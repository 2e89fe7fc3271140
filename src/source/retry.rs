//! Retry with exponential backoff for metadata source calls.
//!
//! [`RetryingSource`] wraps any [`MetadataSource`] and retries calls that fail
//! with a transient error (see [`ServerError::is_transient`]). Permission and
//! configuration errors fail on the first attempt.

use super::{MetadataSource, SharedSource};
use crate::constants::{
    DEFAULT_RETRY_INITIAL_DELAY, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY,
    DEFAULT_RETRY_MULTIPLIER,
};
use crate::error::{Result, ServerError};
use crate::schema::model::{
    ColumnInfo, ConstraintInfo, IndexInfo, ObjectSummary, RelationshipMap, TableComments,
    TableStats, UserTypeInfo, VendorInfo,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to add +/- 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Execute once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);

        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        let final_delay_ms = if self.jitter {
            capped_delay_ms * jitter_factor(rand_jitter())
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms as u64)
    }
}

/// Map a fraction in [0, 1) onto a delay factor in [0.75, 1.25).
fn jitter_factor(fraction: f64) -> f64 {
    0.75 + fraction * 0.5
}

/// Fraction of the current second, in [0, 1).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    nanos_fraction(nanos)
}

fn nanos_fraction(nanos: u32) -> f64 {
    f64::from(nanos) / 1_000_000_000.0
}

/// Execute an async operation, retrying transient failures.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, what: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("Retrying {} (attempt {}) after {:?}", what, attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                warn!(
                    "Transient error in {} on attempt {}/{}: {}",
                    what,
                    attempt + 1,
                    attempts,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    debug!("{} gave up after {:?}", what, start.elapsed());
    Err(last_error.unwrap_or_else(|| ServerError::internal("retry failed with no error captured")))
}

/// Metadata source decorator that retries transient failures.
pub struct RetryingSource {
    inner: SharedSource,
    config: RetryConfig,
}

impl RetryingSource {
    pub fn new(inner: SharedSource, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl MetadataSource for RetryingSource {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    async fn list_table_names(&self) -> Result<Vec<String>> {
        with_retry(&self.config, "list_table_names", || self.inner.list_table_names()).await
    }

    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        with_retry(&self.config, "fetch_columns", || self.inner.fetch_columns(table)).await
    }

    async fn fetch_relationships(&self, table: &str) -> Result<RelationshipMap> {
        with_retry(&self.config, "fetch_relationships", || {
            self.inner.fetch_relationships(table)
        })
        .await
    }

    async fn fetch_constraints(&self, table: &str) -> Result<Vec<ConstraintInfo>> {
        with_retry(&self.config, "fetch_constraints", || {
            self.inner.fetch_constraints(table)
        })
        .await
    }

    async fn fetch_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        with_retry(&self.config, "fetch_indexes", || self.inner.fetch_indexes(table)).await
    }

    async fn fetch_stats(&self, table: &str) -> Result<Option<TableStats>> {
        with_retry(&self.config, "fetch_stats", || self.inner.fetch_stats(table)).await
    }

    async fn fetch_comments(&self, table: &str) -> Result<Option<TableComments>> {
        with_retry(&self.config, "fetch_comments", || self.inner.fetch_comments(table)).await
    }

    async fn list_objects(&self, object_type: &str) -> Result<Vec<ObjectSummary>> {
        with_retry(&self.config, "list_objects", || {
            self.inner.list_objects(object_type)
        })
        .await
    }

    async fn fetch_object_source(&self, object_type: &str, name: &str) -> Result<Option<String>> {
        with_retry(&self.config, "fetch_object_source", || {
            self.inner.fetch_object_source(object_type, name)
        })
        .await
    }

    async fn fetch_dependents(&self, name: &str) -> Result<Vec<ObjectSummary>> {
        with_retry(&self.config, "fetch_dependents", || self.inner.fetch_dependents(name)).await
    }

    async fn list_user_types(&self) -> Result<Vec<UserTypeInfo>> {
        with_retry(&self.config, "list_user_types", || self.inner.list_user_types()).await
    }

    async fn fetch_vendor_info(&self) -> Result<Option<VendorInfo>> {
        with_retry(&self.config, "fetch_vendor_info", || self.inner.fetch_vendor_info()).await
    }
}
