//! Metadata source backed by a JSON schema snapshot.
//!
//! The snapshot file lists tables in directory order with their columns,
//! constraints, indexes, statistics and comments, plus any non-table objects:
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "EMPLOYEES",
//!       "columns": [{"name": "EMPLOYEE_ID", "type": "NUMBER", "nullable": false}],
//!       "constraints": [{"name": "EMP_DEPT_FK", "type": "FOREIGN KEY",
//!                        "columns": ["DEPARTMENT_ID"],
//!                        "references": {"table": "DEPARTMENTS", "columns": ["DEPARTMENT_ID"]}}],
//!       "indexes": [], "stats": null, "comments": null }
//!   ],
//!   "objects": [{"name": "ADD_JOB_HISTORY", "type": "PROCEDURE",
//!                "source": "PROCEDURE add_job_history ...", "depends_on": ["JOB_HISTORY"]}],
//!   "types": [{"name": "ADDRESS_T", "type_category": "OBJECT",
//!              "attributes": [{"name": "STREET", "type": "VARCHAR2"}]}],
//!   "vendor": "Oracle", "version": "19.0.0.0.0"
//! }
//! ```
//!
//! An object's `depends_on` lists the tables and objects it references; the
//! dependents of a name are the objects that list it.
//!
//! Relationships are not stored in the file. They are derived from foreign-key
//! constraints: the owning table gets an `OUTGOING` link and the referenced
//! table an `INCOMING` one. The file is re-read on every directory listing, so
//! a rebuild picks up edits.

use super::MetadataSource;
use crate::error::{Result, ServerError};
use crate::schema::model::{
    normalize_table_name, ColumnInfo, ConstraintInfo, ConstraintType, Direction, IndexInfo,
    ObjectSummary, Relationship, RelationshipMap, TableComments, TableStats, UserTypeInfo,
    VendorInfo,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One table in a snapshot file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotTable {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub constraints: Vec<ConstraintInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub stats: Option<TableStats>,
    #[serde(default)]
    pub comments: Option<TableComments>,
}

/// One non-table object in a snapshot file.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotObject {
    #[serde(flatten)]
    pub summary: ObjectSummary,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Contents of a snapshot file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tables: Vec<SnapshotTable>,
    #[serde(default)]
    pub objects: Vec<SnapshotObject>,
    #[serde(default)]
    pub types: Vec<UserTypeInfo>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub version_details: Vec<String>,
}

impl Snapshot {
    fn vendor_info(&self) -> Option<VendorInfo> {
        self.vendor.as_ref().map(|vendor| VendorInfo {
            vendor: vendor.clone(),
            version: self.version.clone().unwrap_or_else(|| "Unknown".to_string()),
            schema: None,
            additional_info: self.version_details.clone(),
        })
    }
}

/// Snapshot with lookup structures built.
#[derive(Debug)]
struct Indexed {
    tables: Vec<SnapshotTable>,
    by_name: HashMap<String, usize>,
    relationships: HashMap<String, RelationshipMap>,
    objects: Vec<SnapshotObject>,
    types: Vec<UserTypeInfo>,
    vendor: Option<VendorInfo>,
}

impl Indexed {
    fn new(snapshot: Snapshot) -> Self {
        let vendor = snapshot.vendor_info();
        let mut objects = snapshot.objects;
        for object in &mut objects {
            object.summary.object_type = object.summary.object_type.to_uppercase();
            for name in &mut object.depends_on {
                *name = normalize_table_name(name);
            }
        }
        let mut tables = snapshot.tables;
        for table in &mut tables {
            table.name = normalize_table_name(&table.name);
            for c in &mut table.constraints {
                if let Some(r) = &mut c.references {
                    r.table = normalize_table_name(&r.table);
                }
            }
        }

        let by_name = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        let mut relationships: HashMap<String, RelationshipMap> = HashMap::new();
        for table in &tables {
            for c in &table.constraints {
                if c.constraint_type != ConstraintType::ForeignKey {
                    continue;
                }
                let Some(target) = &c.references else {
                    continue;
                };
                for (local, foreign) in c.columns.iter().zip(&target.columns) {
                    relationships
                        .entry(table.name.clone())
                        .or_default()
                        .entry(target.table.clone())
                        .or_default()
                        .push(Relationship {
                            local_column: local.clone(),
                            foreign_column: foreign.clone(),
                            direction: Direction::Outgoing,
                        });
                    relationships
                        .entry(target.table.clone())
                        .or_default()
                        .entry(table.name.clone())
                        .or_default()
                        .push(Relationship {
                            local_column: foreign.clone(),
                            foreign_column: local.clone(),
                            direction: Direction::Incoming,
                        });
                }
            }
        }

        Self {
            tables,
            by_name,
            relationships,
            objects,
            types: snapshot.types,
            vendor,
        }
    }

    fn table(&self, name: &str) -> Result<&SnapshotTable> {
        self.by_name
            .get(name)
            .map(|&i| &self.tables[i])
            .ok_or_else(|| ServerError::invalid_input(format!("table '{}' not in snapshot", name)))
    }
}

/// Metadata source reading a JSON snapshot.
pub struct SnapshotSource {
    name: String,
    path: Option<PathBuf>,
    state: RwLock<Option<Arc<Indexed>>>,
}

impl SnapshotSource {
    /// Create a source that reads `path` on demand.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("snapshot:{}", path.display()),
            path: Some(path),
            state: RwLock::new(None),
        }
    }

    /// Create a source over an in-memory snapshot.
    pub fn from_snapshot(name: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            name: name.into(),
            path: None,
            state: RwLock::new(Some(Arc::new(Indexed::new(snapshot)))),
        }
    }

    async fn reload(&self) -> Result<Arc<Indexed>> {
        let Some(path) = &self.path else {
            let cached = self.state.read().clone();
            return cached.ok_or_else(|| ServerError::internal("snapshot not loaded"));
        };
        let snapshot = read_snapshot(path).await?;
        let indexed = Arc::new(Indexed::new(snapshot));
        debug!(
            "Loaded metadata snapshot {} ({} tables)",
            path.display(),
            indexed.tables.len()
        );
        *self.state.write() = Some(indexed.clone());
        Ok(indexed)
    }

    async fn current(&self) -> Result<Arc<Indexed>> {
        let cached = self.state.read().clone();
        match cached {
            Some(indexed) => Ok(indexed),
            None => self.reload().await,
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ServerError::config(format!("metadata file not found: {}", path.display()))
        } else {
            ServerError::source_unavailable_with(
                format!("cannot read metadata file {}", path.display()),
                e,
            )
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ServerError::config(format!("invalid metadata file {}: {}", path.display(), e))
    })
}

#[async_trait]
impl MetadataSource for SnapshotSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn list_table_names(&self) -> Result<Vec<String>> {
        let indexed = self.reload().await?;
        Ok(indexed.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        Ok(self.current().await?.table(table)?.columns.clone())
    }

    async fn fetch_relationships(&self, table: &str) -> Result<RelationshipMap> {
        let indexed = self.current().await?;
        indexed.table(table)?;
        Ok(indexed.relationships.get(table).cloned().unwrap_or_default())
    }

    async fn fetch_constraints(&self, table: &str) -> Result<Vec<ConstraintInfo>> {
        Ok(self.current().await?.table(table)?.constraints.clone())
    }

    async fn fetch_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        Ok(self.current().await?.table(table)?.indexes.clone())
    }

    async fn fetch_stats(&self, table: &str) -> Result<Option<TableStats>> {
        Ok(self.current().await?.table(table)?.stats.clone())
    }

    async fn fetch_comments(&self, table: &str) -> Result<Option<TableComments>> {
        Ok(self.current().await?.table(table)?.comments.clone())
    }

    async fn list_objects(&self, object_type: &str) -> Result<Vec<ObjectSummary>> {
        let indexed = self.current().await?;
        Ok(indexed
            .objects
            .iter()
            .filter(|o| o.summary.object_type.eq_ignore_ascii_case(object_type))
            .map(|o| o.summary.clone())
            .collect())
    }

    async fn fetch_object_source(&self, object_type: &str, name: &str) -> Result<Option<String>> {
        let indexed = self.current().await?;
        Ok(indexed
            .objects
            .iter()
            .find(|o| {
                o.summary.object_type.eq_ignore_ascii_case(object_type)
                    && o.summary.name.eq_ignore_ascii_case(name)
            })
            .and_then(|o| o.source.clone()))
    }

    async fn fetch_dependents(&self, name: &str) -> Result<Vec<ObjectSummary>> {
        let key = normalize_table_name(name);
        let indexed = self.current().await?;
        Ok(indexed
            .objects
            .iter()
            .filter(|o| o.depends_on.contains(&key))
            .map(|o| o.summary.clone())
            .collect())
    }

    async fn list_user_types(&self) -> Result<Vec<UserTypeInfo>> {
        Ok(self.current().await?.types.clone())
    }

    async fn fetch_vendor_info(&self) -> Result<Option<VendorInfo>> {
        Ok(self.current().await?.vendor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HR: &str = r#"{
        "tables": [
            {"name": "employees",
             "columns": [
                {"name": "EMPLOYEE_ID", "type": "NUMBER", "nullable": false, "precision": 6},
                {"name": "DEPARTMENT_ID", "type": "NUMBER", "nullable": true}
             ],
             "constraints": [
                {"name": "EMP_EMP_ID_PK", "type": "PRIMARY KEY", "columns": ["EMPLOYEE_ID"]},
                {"name": "EMP_DEPT_FK", "type": "FOREIGN KEY", "columns": ["DEPARTMENT_ID"],
                 "references": {"table": "departments", "columns": ["DEPARTMENT_ID"]}}
             ],
             "indexes": [{"name": "EMP_EMP_ID_PK", "unique": true, "columns": ["EMPLOYEE_ID"], "status": "VALID"}],
             "stats": {"row_count": 107, "blocks": 5, "avg_row_length": 69, "last_analyzed": "2024-01-01"}},
            {"name": "DEPARTMENTS",
             "columns": [{"name": "DEPARTMENT_ID", "type": "NUMBER", "nullable": false}]}
        ],
        "objects": [
            {"name": "ADD_JOB_HISTORY", "type": "PROCEDURE", "status": "VALID",
             "source": "PROCEDURE add_job_history(p_emp_id NUMBER) IS BEGIN NULL; END;",
             "depends_on": ["job_history"]},
            {"name": "EMP_DETAILS_VIEW", "type": "view", "depends_on": ["EMPLOYEES", "DEPARTMENTS"]}
        ],
        "types": [
            {"name": "ADDRESS_T", "type_category": "OBJECT", "owner": "HR",
             "attributes": [{"name": "STREET", "type": "VARCHAR2"}, {"name": "CITY", "type": "VARCHAR2"}]}
        ],
        "vendor": "Oracle",
        "version": "19.0.0.0.0",
        "version_details": ["Oracle Database 19c Enterprise Edition"]
    }"#;

    fn hr_source() -> SnapshotSource {
        SnapshotSource::from_snapshot("hr", serde_json::from_str(HR).unwrap())
    }

    #[tokio::test]
    async fn test_lists_normalized_names_in_order() {
        let source = hr_source();
        assert_eq!(
            source.list_table_names().await.unwrap(),
            vec!["EMPLOYEES", "DEPARTMENTS"]
        );
    }

    #[tokio::test]
    async fn test_relationships_derived_both_ways() {
        let source = hr_source();

        let emp = source.fetch_relationships("EMPLOYEES").await.unwrap();
        let out = &emp["DEPARTMENTS"][0];
        assert_eq!(out.direction, Direction::Outgoing);
        assert_eq!(out.local_column, "DEPARTMENT_ID");

        let dept = source.fetch_relationships("DEPARTMENTS").await.unwrap();
        let inc = &dept["EMPLOYEES"][0];
        assert_eq!(inc.direction, Direction::Incoming);
        assert_eq!(inc.foreign_column, "DEPARTMENT_ID");
    }

    #[tokio::test]
    async fn test_absent_fields() {
        let source = hr_source();
        assert!(source.fetch_stats("DEPARTMENTS").await.unwrap().is_none());
        assert!(source.fetch_indexes("DEPARTMENTS").await.unwrap().is_empty());
        assert_eq!(
            source.fetch_stats("EMPLOYEES").await.unwrap().unwrap().row_count,
            Some(107)
        );
        assert!(source.fetch_columns("NOSUCHTABLE").await.is_err());
    }

    #[tokio::test]
    async fn test_list_objects_by_type() {
        let source = hr_source();
        let procs = source.list_objects("procedure").await.unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].name, "ADD_JOB_HISTORY");
        assert!(source.list_objects("PACKAGE").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_source_and_dependents() {
        let source = hr_source();
        let text = source
            .fetch_object_source("procedure", "add_job_history")
            .await
            .unwrap()
            .unwrap();
        assert!(text.starts_with("PROCEDURE add_job_history"));
        assert!(source.fetch_object_source("VIEW", "EMP_DETAILS_VIEW").await.unwrap().is_none());

        let deps = source.fetch_dependents("employees").await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "EMP_DETAILS_VIEW");
        assert_eq!(deps[0].object_type, "VIEW");
        assert_eq!(source.fetch_dependents("JOB_HISTORY").await.unwrap()[0].name, "ADD_JOB_HISTORY");
    }

    #[tokio::test]
    async fn test_types_and_vendor() {
        let source = hr_source();
        let types = source.list_user_types().await.unwrap();
        assert_eq!(types[0].attributes.len(), 2);

        let vendor = source.fetch_vendor_info().await.unwrap().unwrap();
        assert_eq!(vendor.vendor, "Oracle");
        assert_eq!(vendor.version, "19.0.0.0.0");
        assert_eq!(vendor.additional_info.len(), 1);

        let bare = SnapshotSource::from_snapshot("x", Snapshot::default());
        assert!(bare.fetch_vendor_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_is_reread_on_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr.json");
        std::fs::write(&path, HR).unwrap();

        let source = SnapshotSource::from_file(&path);
        assert_eq!(source.list_table_names().await.unwrap().len(), 2);

        std::fs::write(&path, r#"{"tables": [{"name": "LOCATIONS"}]}"#).unwrap();
        assert_eq!(source.list_table_names().await.unwrap(), vec!["LOCATIONS"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let source = SnapshotSource::from_file("/nonexistent/hr.json");
        let err = source.list_table_names().await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
