//! Table metadata model.
//!
//! `TableInfo` is the unit stored in a [`SchemaCache`](super::SchemaCache).
//! Optional fields use `Option` so that the persisted form distinguishes a
//! field that was never fetched (`null`) from one that was fetched and came
//! back empty (`[]` or an object with empty members).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

/// Normalize a table name for use as a cache key.
pub fn normalize_table_name(name: &str) -> String {
    name.trim().to_uppercase()
}

// =============================================================================
// Columns and Relationships
// =============================================================================

/// A single column descriptor, in physical column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Data type name as reported by the data dictionary.
    #[serde(rename = "type")]
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Character or byte length.
    #[serde(default)]
    pub length: Option<u32>,

    /// Numeric precision.
    #[serde(default)]
    pub precision: Option<u32>,

    /// Numeric scale.
    #[serde(default)]
    pub scale: Option<i32>,

    /// Default value expression.
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnInfo {
    /// Create a column with only the required fields set.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            length: None,
            precision: None,
            scale: None,
            default: None,
        }
    }

    /// Render the type with its length or precision/scale suffix.
    pub fn type_display(&self) -> String {
        match (self.precision, self.scale, self.length) {
            (Some(p), Some(s), _) if s != 0 => format!("{}({},{})", self.data_type, p, s),
            (Some(p), _, _) => format!("{}({})", self.data_type, p),
            (None, _, Some(len)) => format!("{}({})", self.data_type, len),
            _ => self.data_type.clone(),
        }
    }
}

/// Foreign-key direction relative to the owning table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// This table holds the foreign key.
    Outgoing,
    /// The related table references this one.
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outgoing => write!(f, "OUTGOING"),
            Self::Incoming => write!(f, "INCOMING"),
        }
    }
}

/// One column pairing of a foreign-key relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub local_column: String,
    pub foreign_column: String,
    pub direction: Direction,
}

/// Relationships keyed by the related table's name.
pub type RelationshipMap = BTreeMap<String, Vec<Relationship>>;

// =============================================================================
// Constraints and Indexes
// =============================================================================

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintType {
    #[serde(rename = "PRIMARY KEY", alias = "PRIMARY_KEY")]
    PrimaryKey,
    #[serde(rename = "FOREIGN KEY", alias = "FOREIGN_KEY")]
    ForeignKey,
    #[serde(rename = "UNIQUE")]
    Unique,
    #[serde(rename = "CHECK")]
    Check,
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::ForeignKey => "FOREIGN KEY",
            Self::Unique => "UNIQUE",
            Self::Check => "CHECK",
        };
        f.write_str(s)
    }
}

/// Target of a foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintReference {
    pub table: String,
    pub columns: Vec<String>,
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,

    /// Constrained columns, in key order.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Referenced table and columns (foreign keys only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ConstraintReference>,

    /// Search condition (check constraints only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A table index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
    #[serde(default)]
    pub tablespace: Option<String>,
    pub status: String,
}

// =============================================================================
// Statistics and Comments
// =============================================================================

/// Optimizer statistics for a table.
///
/// A table that was never analyzed has every field `None`; the struct itself
/// being present still records that statistics were fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub blocks: Option<u64>,
    #[serde(default)]
    pub avg_row_length: Option<u64>,
    #[serde(default)]
    pub last_analyzed: Option<String>,
}

/// Table and column documentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableComments {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

// =============================================================================
// TableInfo
// =============================================================================

/// Everything known about one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Normalized table name.
    pub table_name: String,

    /// Columns in physical order.
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,

    /// Foreign-key relationships keyed by related table.
    #[serde(default)]
    pub relationships: RelationshipMap,

    /// Constraints; `None` when never fetched.
    #[serde(default)]
    pub constraints: Option<Vec<ConstraintInfo>>,

    /// Indexes; `None` when never fetched.
    #[serde(default)]
    pub indexes: Option<Vec<IndexInfo>>,

    /// Statistics; `None` when never fetched.
    #[serde(default)]
    pub table_stats: Option<TableStats>,

    /// Comments; `None` when never fetched.
    #[serde(default)]
    pub comments: Option<TableComments>,

    /// Set once every extended field has been fetched successfully.
    #[serde(default)]
    pub fully_loaded: bool,
}

/// Tables linked to a table through foreign keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelatedTables {
    /// Tables this table points at (outgoing foreign keys).
    pub referenced_tables: Vec<String>,
    /// Tables pointing at this table (incoming foreign keys).
    pub referencing_tables: Vec<String>,
}

impl RelatedTables {
    pub fn is_empty(&self) -> bool {
        self.referenced_tables.is_empty() && self.referencing_tables.is_empty()
    }
}

impl TableInfo {
    /// Create a name-only placeholder as produced by lazy indexing.
    pub fn placeholder(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            relationships: RelationshipMap::new(),
            constraints: None,
            indexes: None,
            table_stats: None,
            comments: None,
            fully_loaded: false,
        }
    }

    /// Split the relationship map into outgoing and incoming neighbours.
    pub fn related_tables(&self) -> RelatedTables {
        let mut related = RelatedTables::default();
        for (table, links) in &self.relationships {
            if links.iter().any(|r| r.direction == Direction::Outgoing) {
                related.referenced_tables.push(table.clone());
            }
            if links.iter().any(|r| r.direction == Direction::Incoming) {
                related.referencing_tables.push(table.clone());
            }
        }
        related
    }

    /// Check that a fully loaded entry has every extended field recorded.
    pub fn is_consistent(&self) -> bool {
        !self.fully_loaded
            || (self.constraints.is_some()
                && self.indexes.is_some()
                && self.table_stats.is_some()
                && self.comments.is_some())
    }

    /// Render a human-readable profile of the table.
    pub fn format_schema(&self) -> String {
        let mut out = String::new();
        let column_comments = self.comments.as_ref().map(|c| &c.columns);

        let _ = writeln!(out, "Table: {}", self.table_name);
        if let Some(text) = self.comments.as_ref().and_then(|c| c.table.as_deref()) {
            let _ = writeln!(out, "Description: {}", text);
        }

        out.push_str("Columns:\n");
        if self.columns.is_empty() {
            out.push_str("  (not loaded)\n");
        }
        for col in &self.columns {
            let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
            let _ = write!(out, "  - {}: {} {}", col.name, col.type_display(), nullable);
            if let Some(default) = &col.default {
                let _ = write!(out, " DEFAULT {}", default.trim());
            }
            if let Some(comment) = column_comments.and_then(|m| m.get(&col.name)) {
                let _ = write!(out, " -- {}", comment);
            }
            out.push('\n');
        }

        if !self.relationships.is_empty() {
            out.push_str("Relationships:\n");
            for (table, links) in &self.relationships {
                for link in links {
                    let arrow = match link.direction {
                        Direction::Outgoing => "->",
                        Direction::Incoming => "<-",
                    };
                    let _ = writeln!(
                        out,
                        "  - {} {} {}.{}",
                        link.local_column, arrow, table, link.foreign_column
                    );
                }
            }
        }

        if let Some(constraints) = self.constraints.as_ref().filter(|c| !c.is_empty()) {
            out.push_str("Constraints:\n");
            for c in constraints {
                let _ = write!(out, "  - {} {} ({})", c.constraint_type, c.name, c.columns.join(", "));
                if let Some(r) = &c.references {
                    let _ = write!(out, " REFERENCES {}({})", r.table, r.columns.join(", "));
                }
                if let Some(cond) = &c.condition {
                    let _ = write!(out, " CHECK {}", cond);
                }
                out.push('\n');
            }
        }

        if let Some(indexes) = self.indexes.as_ref().filter(|i| !i.is_empty()) {
            out.push_str("Indexes:\n");
            for idx in indexes {
                let unique = if idx.unique { "UNIQUE " } else { "" };
                let _ = writeln!(
                    out,
                    "  - {}{} ({}) {}",
                    unique,
                    idx.name,
                    idx.columns.join(", "),
                    idx.status
                );
            }
        }

        if let Some(stats) = &self.table_stats {
            if let Some(rows) = stats.row_count {
                let _ = write!(out, "Statistics: {} rows", rows);
                if let Some(blocks) = stats.blocks {
                    let _ = write!(out, ", {} blocks", blocks);
                }
                if let Some(avg) = stats.avg_row_length {
                    let _ = write!(out, ", avg row length {}", avg);
                }
                if let Some(when) = &stats.last_analyzed {
                    let _ = write!(out, ", last analyzed {}", when);
                }
                out.push('\n');
            }
        }

        if !self.fully_loaded {
            out.push_str("(extended metadata not loaded)\n");
        }

        out
    }
}

// =============================================================================
// Non-table Objects
// =============================================================================

/// Summary of a non-table schema object (procedure, package, view, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// One attribute of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// A user-defined type (object, collection, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTypeInfo {
    pub name: String,
    /// OBJECT, COLLECTION, ...
    pub type_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub attributes: Vec<TypeAttribute>,
}

/// Vendor, version and schema context of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorInfo {
    pub vendor: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Banner lines or other version detail.
    #[serde(default)]
    pub additional_info: Vec<String>,
}
