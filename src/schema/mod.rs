//! Schema metadata cache.
//!
//! - `model`: table metadata types
//! - `cache`: per-database snapshot and persistence
//! - `manager`: build, load, promotion and rebuild of one database's cache

pub mod cache;
pub mod manager;
pub mod model;

pub use cache::{CacheStats, SchemaCache};
pub use manager::{CacheOrigin, CacheStatsReport, LoadOutcome, SchemaManager};
pub use model::{
    normalize_table_name, ColumnInfo, ConstraintInfo, ConstraintReference, ConstraintType,
    Direction, IndexInfo, ObjectSummary, RelatedTables, Relationship, RelationshipMap,
    TableComments, TableInfo, TableStats, TypeAttribute, UserTypeInfo, VendorInfo,
};
