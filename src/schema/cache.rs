//! Per-database schema snapshot and its on-disk form.
//!
//! The cache file is JSON. Writes go to a temporary file in the target
//! directory and are renamed over the old file, so a reader never sees a
//! partially written cache.

use super::model::TableInfo;
use crate::constants::CACHE_FILE_SUFFIX;
use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Usage counters persisted alongside the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStats {
    /// Lookups answered from a fully loaded entry.
    pub hits: u64,

    /// Lookups that needed the metadata source.
    pub misses: u64,

    /// Full index builds.
    pub rebuilds: u64,

    /// Entries promoted to full detail on demand.
    pub promotions: u64,

    /// Table loads that left at least one field unfetched.
    pub partial_failures: u64,
}

/// Snapshot of one database's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCache {
    /// Loaded entries keyed by normalized table name.
    pub tables: BTreeMap<String, TableInfo>,

    /// Unix timestamp (seconds) of the last build or persist.
    pub last_updated: f64,

    /// Every table known to exist, in directory order.
    pub all_table_names: Vec<String>,

    /// Non-table metadata (object listings, sources, dependents, types,
    /// vendor info) keyed by lookup, e.g. `objects:PROCEDURE`.
    #[serde(default)]
    pub object_cache: BTreeMap<String, serde_json::Value>,

    /// Usage counters.
    #[serde(default)]
    pub cache_stats: CacheStats,
}

/// Borrowed form of [`SchemaCache`] used for writing.
#[derive(Serialize)]
struct PersistedView<'a> {
    tables: &'a BTreeMap<String, TableInfo>,
    last_updated: f64,
    all_table_names: &'a [String],
    object_cache: &'a BTreeMap<String, serde_json::Value>,
    cache_stats: &'a CacheStats,
}

/// Current time as fractional Unix seconds.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Path of the cache file for a database inside `cache_dir`.
pub fn cache_file_path(cache_dir: &Path, database: &str) -> PathBuf {
    let sanitized: String = database
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cache_dir.join(format!("{}{}", sanitized, CACHE_FILE_SUFFIX))
}

impl SchemaCache {
    /// Build a cache from table entries in directory order.
    pub fn from_tables(entries: Vec<TableInfo>) -> Self {
        let mut all_table_names = Vec::with_capacity(entries.len());
        let mut tables = BTreeMap::new();
        for info in entries {
            if !tables.contains_key(&info.table_name) {
                all_table_names.push(info.table_name.clone());
            }
            tables.insert(info.table_name.clone(), info);
        }
        Self {
            tables,
            last_updated: now_timestamp(),
            all_table_names,
            object_cache: BTreeMap::new(),
            cache_stats: CacheStats::default(),
        }
    }

    /// Number of known table names.
    pub fn len(&self) -> usize {
        self.all_table_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_table_names.is_empty()
    }

    /// Whether `name` (already normalized) is a known table.
    pub fn contains_name(&self, name: &str) -> bool {
        self.tables.contains_key(name) || self.all_table_names.iter().any(|n| n == name)
    }

    /// Number of entries with full detail.
    pub fn fully_loaded_count(&self) -> usize {
        self.tables.values().filter(|t| t.fully_loaded).count()
    }

    /// Mark the snapshot as updated now.
    pub fn touch(&mut self) {
        self.last_updated = now_timestamp();
    }

    /// Check the structural invariants of a snapshot.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let names: HashSet<&str> = self.all_table_names.iter().map(String::as_str).collect();
        for (key, info) in &self.tables {
            if !names.contains(key.as_str()) {
                return Err(format!("table '{}' missing from all_table_names", key));
            }
            if &info.table_name != key {
                return Err(format!(
                    "entry '{}' stored under key '{}'",
                    info.table_name, key
                ));
            }
            if !info.is_consistent() {
                return Err(format!(
                    "table '{}' is marked fully loaded with unfetched fields",
                    key
                ));
            }
        }
        Ok(())
    }

    /// Serialize with `stats` in place of the stored counters.
    pub fn to_bytes_with_stats(&self, stats: &CacheStats) -> Result<Vec<u8>> {
        let view = PersistedView {
            tables: &self.tables,
            last_updated: self.last_updated,
            all_table_names: &self.all_table_names,
            object_cache: &self.object_cache,
            cache_stats: stats,
        };
        Ok(serde_json::to_vec_pretty(&view)?)
    }

    /// Read a persisted cache.
    ///
    /// Returns `Ok(None)` when no file exists and `CacheCorruption` when the
    /// file cannot be parsed or violates the snapshot invariants.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ServerError::cache_corruption(path, e.to_string())),
        };
        let cache: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ServerError::cache_corruption(path, e.to_string()))?;
        cache
            .validate()
            .map_err(|msg| ServerError::cache_corruption(path, msg))?;
        Ok(Some(cache))
    }
}

/// Write `bytes` to `path` through a temporary file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ServerError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{ColumnInfo, IndexInfo, ObjectSummary, TableComments, TableStats};

    fn save(cache: &SchemaCache, path: &Path) {
        let bytes = cache.to_bytes_with_stats(&cache.cache_stats).unwrap();
        write_atomic(path, &bytes).unwrap();
    }

    fn sample_cache() -> SchemaCache {
        let mut employees = TableInfo::placeholder("EMPLOYEES");
        employees.columns = vec![ColumnInfo::new("EMPLOYEE_ID", "NUMBER", false)];
        employees.constraints = Some(Vec::new());
        employees.indexes = Some(vec![IndexInfo {
            name: "EMP_PK".to_string(),
            unique: true,
            columns: vec!["EMPLOYEE_ID".to_string()],
            tablespace: None,
            status: "VALID".to_string(),
        }]);
        employees.table_stats = Some(TableStats::default());
        employees.comments = Some(TableComments::default());
        employees.fully_loaded = true;

        let mut cache = SchemaCache::from_tables(vec![
            employees,
            TableInfo::placeholder("DEPARTMENTS"),
        ]);
        cache.all_table_names.push("LOCATIONS".to_string());
        let procedures = vec![ObjectSummary {
            name: "ADD_JOB_HISTORY".to_string(),
            object_type: "PROCEDURE".to_string(),
            owner: Some("HR".to_string()),
            status: Some("VALID".to_string()),
            created: None,
            last_modified: None,
        }];
        cache.object_cache.insert(
            "objects:PROCEDURE".to_string(),
            serde_json::to_value(procedures).unwrap(),
        );
        cache.cache_stats.hits = 3;
        cache
    }

    #[test]
    fn test_from_tables_preserves_order() {
        let cache = SchemaCache::from_tables(vec![
            TableInfo::placeholder("EMPLOYEES"),
            TableInfo::placeholder("DEPARTMENTS"),
            TableInfo::placeholder("EMPLOYEES"),
        ]);
        assert_eq!(cache.all_table_names, vec!["EMPLOYEES", "DEPARTMENTS"]);
        assert_eq!(cache.tables.len(), 2);
        assert_eq!(cache.fully_loaded_count(), 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_file_path(dir.path(), "hr");
        let cache = sample_cache();

        save(&cache, &path);
        let loaded = SchemaCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded, cache);

        let employees = &loaded.tables["EMPLOYEES"];
        assert_eq!(employees.constraints, Some(Vec::new()));
        assert_eq!(loaded.tables["DEPARTMENTS"].constraints, None);
        assert!(loaded.contains_name("LOCATIONS"));
        assert!(!loaded.tables.contains_key("LOCATIONS"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent_schema_cache.json");
        assert!(SchemaCache::load(&path).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr_schema_cache.json");
        std::fs::write(&path, b"{\"tables\": {").unwrap();
        let err = SchemaCache::load(&path).unwrap_err();
        assert!(matches!(err, ServerError::CacheCorruption { .. }));
    }

    #[test]
    fn test_load_rejects_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr_schema_cache.json");
        let mut cache = sample_cache();
        cache.all_table_names.retain(|n| n != "DEPARTMENTS");
        std::fs::write(&path, cache.to_bytes_with_stats(&cache.cache_stats).unwrap()).unwrap();

        let err = SchemaCache::load(&path).unwrap_err();
        assert!(err.to_string().contains("DEPARTMENTS"));
    }

    #[test]
    fn test_older_stats_load_with_defaults() {
        let json = r#"{"tables":{},"last_updated":1700000000.5,"all_table_names":[],
                       "object_cache":{},"cache_stats":{"hits":4,"misses":2,"rebuilds":1}}"#;
        let cache: SchemaCache = serde_json::from_str(json).unwrap();
        assert_eq!(cache.cache_stats.hits, 4);
        assert_eq!(cache.cache_stats.promotions, 0);
        assert_eq!(cache.last_updated, 1_700_000_000.5);
    }

    #[test]
    fn test_cache_file_path_sanitizes() {
        let path = cache_file_path(Path::new("/var/cache"), "hr/prod db");
        assert_eq!(path, PathBuf::from("/var/cache/hr_prod_db_schema_cache.json"));
    }

    #[test]
    fn test_write_atomic_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_file_path(dir.path(), "hr");
        let mut cache = sample_cache();
        save(&cache, &path);
        cache.cache_stats.hits = 10;
        save(&cache, &path);

        let loaded = SchemaCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded.cache_stats.hits, 10);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
