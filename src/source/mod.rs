//! Metadata source boundary.
//!
//! A [`MetadataSource`] answers schema-introspection queries for one database.
//! It holds no caching logic; everything here is consumed by the
//! [`SchemaManager`](crate::schema::SchemaManager).
//!
//! Table detail is loaded through [`load_table`], parameterized by
//! [`FetchDepth`]. Eager builds call it for every table and on-demand
//! promotion calls it for one.

pub mod retry;
pub mod snapshot;

pub use retry::{RetryConfig, RetryingSource};
pub use snapshot::SnapshotSource;

use crate::error::{Result, ServerError};
use crate::schema::model::{
    ColumnInfo, ConstraintInfo, IndexInfo, ObjectSummary, RelationshipMap, TableComments,
    TableInfo, TableStats, UserTypeInfo, VendorInfo,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Schema-introspection queries for one database.
///
/// Table names passed in are normalized (see
/// [`normalize_table_name`](crate::schema::normalize_table_name)).
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Short description used in log messages.
    fn source_name(&self) -> &str;

    /// List every table name, in directory order.
    async fn list_table_names(&self) -> Result<Vec<String>>;

    /// Fetch column descriptors in physical order.
    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Fetch foreign-key relationships in both directions.
    async fn fetch_relationships(&self, table: &str) -> Result<RelationshipMap>;

    async fn fetch_constraints(&self, table: &str) -> Result<Vec<ConstraintInfo>>;

    async fn fetch_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    /// Fetch optimizer statistics, `None` if the table was never analyzed.
    async fn fetch_stats(&self, table: &str) -> Result<Option<TableStats>>;

    /// Fetch table and column comments, `None` if there are none.
    async fn fetch_comments(&self, table: &str) -> Result<Option<TableComments>>;

    /// List non-table objects of the given (upper-case) type.
    async fn list_objects(&self, _object_type: &str) -> Result<Vec<ObjectSummary>> {
        Ok(Vec::new())
    }

    /// Columns of `tables` whose upper-cased name contains `needle`.
    ///
    /// The default walks [`fetch_columns`](Self::fetch_columns) table by
    /// table. A table whose columns cannot be fetched is skipped.
    async fn find_columns(&self, needle: &str, tables: &[String]) -> Result<Vec<ColumnMatch>> {
        let mut found = Vec::new();
        for table in tables {
            let columns = match self.fetch_columns(table).await {
                Ok(columns) => columns,
                Err(e) => {
                    warn!(table = %table, error = %e, "Skipping table in column search");
                    continue;
                }
            };
            let matching: Vec<ColumnInfo> = columns
                .into_iter()
                .filter(|c| c.name.to_uppercase().contains(needle))
                .collect();
            if !matching.is_empty() {
                found.push((table.clone(), matching));
            }
        }
        Ok(found)
    }

    /// Source text of a stored object, `None` if there is none.
    async fn fetch_object_source(&self, _object_type: &str, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Objects that depend on the named table or object.
    async fn fetch_dependents(&self, _name: &str) -> Result<Vec<ObjectSummary>> {
        Ok(Vec::new())
    }

    /// Every user-defined type.
    async fn list_user_types(&self) -> Result<Vec<UserTypeInfo>> {
        Ok(Vec::new())
    }

    /// Vendor and version of the database, `None` if unknown.
    async fn fetch_vendor_info(&self) -> Result<Option<VendorInfo>> {
        Ok(None)
    }
}

/// A table and its columns matching a search.
pub type ColumnMatch = (String, Vec<ColumnInfo>);

/// Shared metadata source handle.
pub type SharedSource = Arc<dyn MetadataSource>;

/// How much detail to load for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDepth {
    /// Name only; no source round-trips.
    Index,
    /// Columns, relationships and every extended field.
    Full,
}

/// A field that could not be fetched during a table load.
#[derive(Debug)]
pub struct FieldFailure {
    pub field: &'static str,
    pub error: ServerError,
}

/// Result of loading one table.
#[derive(Debug)]
pub struct TableLoad {
    pub info: TableInfo,
    pub failures: Vec<FieldFailure>,
}

impl TableLoad {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

macro_rules! fetch_field {
    ($failures:ident, $table:expr, $field:literal, $call:expr) => {
        match $call.await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(table = %$table, field = $field, error = %error, "Metadata fetch failed");
                $failures.push(FieldFailure {
                    field: $field,
                    error,
                });
                None
            }
        }
    };
}

/// Load `base` up to `depth`.
///
/// Every field is fetched independently; a failing field is recorded and the
/// rest still load. Fields that fail keep their value from `base`. The entry is
/// marked fully loaded only when every field succeeded.
pub async fn load_table(source: &dyn MetadataSource, base: TableInfo, depth: FetchDepth) -> TableLoad {
    let mut info = base;
    let mut failures = Vec::new();

    if depth == FetchDepth::Index {
        return TableLoad { info, failures };
    }

    let table = info.table_name.clone();

    if let Some(columns) = fetch_field!(failures, table, "columns", source.fetch_columns(&table)) {
        info.columns = columns;
    }
    if let Some(rels) =
        fetch_field!(failures, table, "relationships", source.fetch_relationships(&table))
    {
        info.relationships = rels;
    }
    if let Some(constraints) =
        fetch_field!(failures, table, "constraints", source.fetch_constraints(&table))
    {
        info.constraints = Some(constraints);
    }
    if let Some(indexes) = fetch_field!(failures, table, "indexes", source.fetch_indexes(&table)) {
        info.indexes = Some(indexes);
    }
    if let Some(stats) = fetch_field!(failures, table, "table_stats", source.fetch_stats(&table)) {
        info.table_stats = Some(stats.unwrap_or_default());
    }
    if let Some(comments) =
        fetch_field!(failures, table, "comments", source.fetch_comments(&table))
    {
        info.comments = Some(comments.unwrap_or_default());
    }

    info.fully_loaded = failures.is_empty();
    TableLoad { info, failures }
}

/// Stand-in source for a database whose settings are invalid.
///
/// Every call fails with the configuration error, so the database stays
/// registered and reports why it cannot be used.
#[derive(Debug)]
pub struct UnconfiguredSource {
    name: String,
    reason: String,
}

impl UnconfiguredSource {
    pub fn new(database: &str, reason: impl Into<String>) -> Self {
        Self {
            name: format!("unconfigured:{}", database),
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(ServerError::config(self.reason.clone()))
    }
}

#[async_trait]
impl MetadataSource for UnconfiguredSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn list_table_names(&self) -> Result<Vec<String>> {
        self.fail()
    }

    async fn fetch_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        self.fail()
    }

    async fn fetch_relationships(&self, _table: &str) -> Result<RelationshipMap> {
        self.fail()
    }

    async fn fetch_constraints(&self, _table: &str) -> Result<Vec<ConstraintInfo>> {
        self.fail()
    }

    async fn fetch_indexes(&self, _table: &str) -> Result<Vec<IndexInfo>> {
        self.fail()
    }

    async fn fetch_stats(&self, _table: &str) -> Result<Option<TableStats>> {
        self.fail()
    }

    async fn fetch_comments(&self, _table: &str) -> Result<Option<TableComments>> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::ConstraintType;

    struct FlakySource {
        fail_indexes: bool,
    }

    #[async_trait]
    impl MetadataSource for FlakySource {
        fn source_name(&self) -> &str {
            "flaky"
        }

        async fn list_table_names(&self) -> Result<Vec<String>> {
            Ok(vec!["EMPLOYEES".to_string()])
        }

        async fn fetch_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
            Ok(vec![ColumnInfo::new("EMPLOYEE_ID", "NUMBER", false)])
        }

        async fn fetch_relationships(&self, _table: &str) -> Result<RelationshipMap> {
            Ok(RelationshipMap::new())
        }

        async fn fetch_constraints(&self, _table: &str) -> Result<Vec<ConstraintInfo>> {
            Ok(vec![ConstraintInfo {
                name: "EMP_PK".to_string(),
                constraint_type: ConstraintType::PrimaryKey,
                columns: vec!["EMPLOYEE_ID".to_string()],
                references: None,
                condition: None,
            }])
        }

        async fn fetch_indexes(&self, _table: &str) -> Result<Vec<IndexInfo>> {
            if self.fail_indexes {
                Err(ServerError::permission_denied("no access to ALL_INDEXES"))
            } else {
                Ok(Vec::new())
            }
        }

        async fn fetch_stats(&self, _table: &str) -> Result<Option<TableStats>> {
            Ok(None)
        }

        async fn fetch_comments(&self, _table: &str) -> Result<Option<TableComments>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_index_depth_makes_no_calls() {
        let source = FlakySource { fail_indexes: true };
        let load = load_table(&source, TableInfo::placeholder("EMPLOYEES"), FetchDepth::Index).await;
        assert!(!load.is_partial());
        assert!(!load.info.fully_loaded);
        assert!(load.info.columns.is_empty());
    }

    #[tokio::test]
    async fn test_full_depth_records_absent_as_empty() {
        let source = FlakySource { fail_indexes: false };
        let load = load_table(&source, TableInfo::placeholder("EMPLOYEES"), FetchDepth::Full).await;
        assert!(!load.is_partial());
        let info = load.info;
        assert!(info.fully_loaded);
        assert_eq!(info.indexes, Some(Vec::new()));
        assert_eq!(info.table_stats, Some(TableStats::default()));
        assert_eq!(info.comments, Some(TableComments::default()));
        assert!(info.is_consistent());
    }

    #[tokio::test]
    async fn test_default_find_columns_walks_tables() {
        let source = FlakySource { fail_indexes: false };
        let found = source
            .find_columns("EMPLOYEE", &["EMPLOYEES".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1[0].name, "EMPLOYEE_ID");
        assert!(source.find_columns("SALARY", &["EMPLOYEES".to_string()]).await.unwrap().is_empty());
        assert!(source.fetch_vendor_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_source_fails_with_reason() {
        let source = UnconfiguredSource::new("sales", "DB_SALES_METADATA_FILE is not set");
        let err = source.list_table_names().await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("DB_SALES_METADATA_FILE"));
        assert_eq!(source.source_name(), "unconfigured:sales");
    }

    #[tokio::test]
    async fn test_field_failure_is_isolated() {
        let source = FlakySource { fail_indexes: true };
        let load = load_table(&source, TableInfo::placeholder("EMPLOYEES"), FetchDepth::Full).await;
        assert!(load.is_partial());
        assert_eq!(load.failures.len(), 1);
        assert_eq!(load.failures[0].field, "indexes");

        let info = load.info;
        assert!(!info.fully_loaded);
        assert_eq!(info.indexes, None);
        assert_eq!(info.constraints.as_ref().map(Vec::len), Some(1));
        assert_eq!(info.columns.len(), 1);
    }
}
