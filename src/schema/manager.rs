//! Schema cache manager for one database.
//!
//! `SchemaManager` is the only thing that mutates a [`SchemaCache`]. It builds
//! the table index, loads and persists the cache file, and promotes lazily
//! indexed tables to full detail when they are first read.
//!
//! # Locking
//!
//! - The cache sits behind a `tokio::sync::RwLock`. Reads of loaded entries
//!   take the read lock; merges and rebuilds take the write lock.
//! - Each table being promoted has its own mutex in `inflight`. Concurrent
//!   readers of the same cold table queue on it, and all but the first find
//!   the entry already loaded when they get the lock.
//! - Detail fetches for a promotion run with no cache lock held. A rebuild
//!   holds the write lock for its whole duration and bumps `generation`; a
//!   promotion that sees a different generation when it comes back to merge
//!   throws its result away and starts over against the new cache.
//! - `persist_lock` orders file writes so the newest state is written last.

use super::cache::{cache_file_path, write_atomic, CacheStats, SchemaCache};
use super::model::{
    normalize_table_name, ColumnInfo, ConstraintInfo, IndexInfo, ObjectSummary, RelatedTables,
    TableInfo, UserTypeInfo, VendorInfo,
};
use crate::error::{Result, ServerError};
use crate::source::{load_table, ColumnMatch, FetchDepth, SharedSource};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

// =============================================================================
// Reports
// =============================================================================

/// Where a cache came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOrigin {
    /// Already held in memory.
    Memory,
    /// Read from the cache file.
    Disk,
    /// Built from the metadata source.
    Built,
}

/// Outcome of [`SchemaManager::load_or_build_cache`] or a rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub origin: CacheOrigin,
    /// Number of known table names.
    pub tables: usize,
    /// Number of entries with full detail.
    pub fully_loaded: usize,
    /// Tables whose eager load left at least one field unfetched.
    pub partial_failures: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl LoadOutcome {
    pub fn is_partial(&self) -> bool {
        !self.partial_failures.is_empty()
    }
}

/// Usage and size figures for one cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    pub database: String,
    pub size: usize,
    pub loaded_entries: usize,
    pub fully_loaded_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub rebuilds: u64,
    pub promotions: u64,
    pub partial_failures: u64,
    /// Keys held in the object cache.
    pub object_keys: Vec<String>,
    pub last_updated: Option<f64>,
    pub cache_file: PathBuf,
}

/// Table entries produced by a build, in directory order.
#[derive(Debug)]
pub struct SchemaIndex {
    pub tables: Vec<TableInfo>,
    /// Tables left partially loaded.
    pub partial_failures: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    rebuilds: AtomicU64,
    promotions: AtomicU64,
    partial_failures: AtomicU64,
}

impl Counters {
    fn seed(&self, stats: &CacheStats) {
        self.hits.store(stats.hits, Ordering::Relaxed);
        self.misses.store(stats.misses, Ordering::Relaxed);
        self.rebuilds.store(stats.rebuilds, Ordering::Relaxed);
        self.promotions.store(stats.promotions, Ordering::Relaxed);
        self.partial_failures
            .store(stats.partial_failures, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

type InflightMap = parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Held while promoting one table; frees the map slot on drop.
struct PromotionSlot<'a> {
    inflight: &'a InflightMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PromotionSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.inflight.lock();
        if map
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.key);
        }
    }
}

// =============================================================================
// SchemaManager
// =============================================================================

/// Owns and maintains the schema cache of one database.
pub struct SchemaManager {
    database: String,
    source: SharedSource,
    cache_path: PathBuf,
    cache: RwLock<Option<SchemaCache>>,
    inflight: InflightMap,
    persist_lock: Mutex<()>,
    generation: AtomicU64,
    counters: Counters,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("database", &self.database)
            .field("source", &self.source.source_name())
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

impl SchemaManager {
    /// Create a manager persisting to `<cache_dir>/<database>_schema_cache.json`.
    pub fn new(database: impl Into<String>, source: SharedSource, cache_dir: &Path) -> Self {
        let database = database.into();
        let cache_path = cache_file_path(cache_dir, &database);
        Self::with_cache_path(database, source, cache_path)
    }

    /// Create a manager persisting to an explicit file.
    pub fn with_cache_path(
        database: impl Into<String>,
        source: SharedSource,
        cache_path: PathBuf,
    ) -> Self {
        Self {
            database: database.into(),
            source,
            cache_path,
            cache: RwLock::new(None),
            inflight: parking_lot::Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Whether a cache is held in memory.
    pub async fn is_loaded(&self) -> bool {
        self.cache.read().await.is_some()
    }

    // =========================================================================
    // Build / Load / Rebuild
    // =========================================================================

    /// List every table and load each to the requested depth.
    ///
    /// With `fetch_all_metadata == false` this is a single directory query.
    /// With `true` every table gets a full load; a table whose detail fails is
    /// kept with what did load and reported in `partial_failures`. A directory
    /// failure is returned as [`ServerError::BuildFailed`].
    pub async fn build_schema_index(&self, fetch_all_metadata: bool) -> Result<SchemaIndex> {
        let names = self.source.list_table_names().await.map_err(|e| {
            error!(database = %self.database, error = %e, "Listing tables failed");
            ServerError::build_failed(&self.database, e)
        })?;

        let mut seen = std::collections::HashSet::new();
        let names: Vec<String> = names
            .iter()
            .map(|n| normalize_table_name(n))
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect();

        let depth = if fetch_all_metadata {
            FetchDepth::Full
        } else {
            FetchDepth::Index
        };

        let mut tables = Vec::with_capacity(names.len());
        let mut partial_failures = Vec::new();
        for name in names {
            let load = load_table(self.source.as_ref(), TableInfo::placeholder(&name), depth).await;
            if load.is_partial() {
                warn!(
                    database = %self.database,
                    table = %name,
                    failed_fields = load.failures.len(),
                    "Table left partially loaded"
                );
                partial_failures.push(name);
            }
            tables.push(load.info);
        }

        Ok(SchemaIndex {
            tables,
            partial_failures,
        })
    }

    /// Return the cache, loading it from disk or building it if needed.
    ///
    /// A missing or corrupt cache file triggers a build. `force_rebuild`
    /// skips both memory and disk.
    pub async fn load_or_build_cache(
        &self,
        force_rebuild: bool,
        fetch_all_metadata: bool,
    ) -> Result<LoadOutcome> {
        let start = Instant::now();

        if !force_rebuild {
            if let Some(outcome) = self.memory_outcome(start).await {
                return Ok(outcome);
            }
        }

        let mut guard = self.cache.write().await;

        if !force_rebuild {
            if let Some(cache) = guard.as_ref() {
                return Ok(Self::outcome(cache, CacheOrigin::Memory, Vec::new(), start));
            }

            match self.read_cache_file().await {
                Ok(Some(cache)) => {
                    self.counters.seed(&cache.cache_stats);
                    let outcome = Self::outcome(&cache, CacheOrigin::Disk, Vec::new(), start);
                    info!(
                        database = %self.database,
                        tables = outcome.tables,
                        fully_loaded = outcome.fully_loaded,
                        "Loaded schema cache from {}",
                        self.cache_path.display()
                    );
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    *guard = Some(cache);
                    return Ok(outcome);
                }
                Ok(None) => {
                    debug!(database = %self.database, "No schema cache file, building");
                }
                Err(e) => {
                    warn!(database = %self.database, error = %e, "Ignoring unreadable schema cache");
                }
            }
        }

        self.rebuild_locked(guard, fetch_all_metadata, start).await
    }

    /// Rebuild the index from the metadata source and replace the cache.
    ///
    /// Blocks reads and promotions for its duration. On failure the previous
    /// cache stays in place.
    pub async fn rebuild_cache(&self, fetch_all_metadata: bool) -> Result<LoadOutcome> {
        let start = Instant::now();
        let guard = self.cache.write().await;
        self.rebuild_locked(guard, fetch_all_metadata, start).await
    }

    async fn rebuild_locked(
        &self,
        mut guard: RwLockWriteGuard<'_, Option<SchemaCache>>,
        fetch_all_metadata: bool,
        start: Instant,
    ) -> Result<LoadOutcome> {
        info!(
            database = %self.database,
            source = %self.source.source_name(),
            fetch_all_metadata,
            "Building schema index"
        );

        let index = self.build_schema_index(fetch_all_metadata).await?;
        let cache = SchemaCache::from_tables(index.tables);

        self.counters.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.counters
            .partial_failures
            .fetch_add(index.partial_failures.len() as u64, Ordering::Relaxed);

        let outcome = Self::outcome(&cache, CacheOrigin::Built, index.partial_failures, start);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *guard = Some(cache);
        drop(guard);

        info!(
            database = %self.database,
            tables = outcome.tables,
            fully_loaded = outcome.fully_loaded,
            partial = outcome.partial_failures.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Schema index built"
        );

        if let Err(e) = self.persist().await {
            warn!(database = %self.database, error = %e, "Failed to persist rebuilt schema cache");
        }

        Ok(outcome)
    }

    async fn memory_outcome(&self, start: Instant) -> Option<LoadOutcome> {
        let guard = self.cache.read().await;
        guard
            .as_ref()
            .map(|cache| Self::outcome(cache, CacheOrigin::Memory, Vec::new(), start))
    }

    fn outcome(
        cache: &SchemaCache,
        origin: CacheOrigin,
        partial_failures: Vec<String>,
        start: Instant,
    ) -> LoadOutcome {
        LoadOutcome {
            origin,
            tables: cache.len(),
            fully_loaded: cache.fully_loaded_count(),
            partial_failures,
            elapsed: start.elapsed(),
        }
    }

    async fn read_cache_file(&self) -> Result<Option<SchemaCache>> {
        let path = self.cache_path.clone();
        tokio::task::spawn_blocking(move || SchemaCache::load(&path))
            .await
            .map_err(|e| ServerError::internal(format!("cache load task failed: {}", e)))?
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a table's metadata, promoting it to full detail if needed.
    ///
    /// Returns `Ok(None)` for a table name that is not in the index.
    pub async fn get_schema_info(&self, table_name: &str) -> Result<Option<TableInfo>> {
        let key = normalize_table_name(table_name);
        if key.is_empty() {
            return Ok(None);
        }

        loop {
            {
                let guard = self.cache.read().await;
                let cache = self.require(&guard)?;
                match cache.tables.get(&key) {
                    Some(info) if info.fully_loaded => {
                        self.counters.hit();
                        return Ok(Some(info.clone()));
                    }
                    Some(_) => {}
                    None if cache.contains_name(&key) => {}
                    None => {
                        self.counters.miss();
                        return Ok(None);
                    }
                }
            }

            let _slot = self.claim_slot(&key).await;

            let (base, generation) = {
                let guard = self.cache.read().await;
                let cache = self.require(&guard)?;
                let generation = self.generation.load(Ordering::SeqCst);
                match cache.tables.get(&key) {
                    Some(info) if info.fully_loaded => {
                        self.counters.hit();
                        return Ok(Some(info.clone()));
                    }
                    Some(info) => (info.clone(), generation),
                    None if cache.contains_name(&key) => (TableInfo::placeholder(&key), generation),
                    None => {
                        self.counters.miss();
                        return Ok(None);
                    }
                }
            };

            self.counters.miss();
            debug!(database = %self.database, table = %key, "Promoting table");
            let load = load_table(self.source.as_ref(), base, FetchDepth::Full).await;
            let partial = load.is_partial();

            {
                let mut guard = self.cache.write().await;
                if self.generation.load(Ordering::SeqCst) != generation {
                    debug!(database = %self.database, table = %key, "Cache rebuilt during promotion, retrying");
                    continue;
                }
                let cache = guard
                    .as_mut()
                    .ok_or_else(|| ServerError::cache_unavailable(&self.database))?;
                cache.tables.insert(key.clone(), load.info.clone());
                cache.touch();
            }

            if partial {
                self.counters
                    .partial_failures
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
            }
            debug!(database = %self.database, table = %key, partial, "Promotion finished");

            if let Err(e) = self.persist().await {
                warn!(database = %self.database, error = %e, "Failed to persist schema cache");
            }

            return Ok(Some(load.info));
        }
    }

    async fn claim_slot(&self, key: &str) -> PromotionSlot<'_> {
        let slot = {
            let mut map = self.inflight.lock();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        PromotionSlot {
            inflight: &self.inflight,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    fn require<'a>(&self, guard: &'a Option<SchemaCache>) -> Result<&'a SchemaCache> {
        guard
            .as_ref()
            .ok_or_else(|| ServerError::cache_unavailable(&self.database))
    }

    /// Constraints of a table, `None` if the table is unknown.
    pub async fn get_table_constraints(
        &self,
        table_name: &str,
    ) -> Result<Option<Vec<ConstraintInfo>>> {
        Ok(self
            .get_schema_info(table_name)
            .await?
            .map(|info| info.constraints.unwrap_or_default()))
    }

    /// Indexes of a table, `None` if the table is unknown.
    pub async fn get_table_indexes(&self, table_name: &str) -> Result<Option<Vec<IndexInfo>>> {
        Ok(self
            .get_schema_info(table_name)
            .await?
            .map(|info| info.indexes.unwrap_or_default()))
    }

    /// Tables linked to a table by foreign keys, `None` if the table is unknown.
    pub async fn get_related_tables(&self, table_name: &str) -> Result<Option<RelatedTables>> {
        Ok(self
            .get_schema_info(table_name)
            .await?
            .map(|info| info.related_tables()))
    }

    /// Every known table name, in directory order.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let guard = self.cache.read().await;
        Ok(self.require(&guard)?.all_table_names.clone())
    }

    /// Table names containing `term` (case-insensitive), at most `limit`.
    pub async fn search_tables(&self, term: &str, limit: usize) -> Result<Vec<String>> {
        let needle = term.trim().to_uppercase();
        let guard = self.cache.read().await;
        let cache = self.require(&guard)?;
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(cache
            .all_table_names
            .iter()
            .filter(|name| name.to_uppercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Columns whose name contains `term`, grouped by table in directory
    /// order, at most `limit` tables.
    ///
    /// Entries holding columns are searched in the cache. Tables not loaded
    /// yet are searched through the metadata source without promoting them.
    pub async fn search_columns(&self, term: &str, limit: usize) -> Result<Vec<ColumnMatch>> {
        let needle = term.trim().to_uppercase();
        let (order, mut found, unloaded) = {
            let guard = self.cache.read().await;
            let cache = self.require(&guard)?;
            if needle.is_empty() {
                return Ok(Vec::new());
            }

            let mut found: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
            let mut unloaded = Vec::new();
            for name in &cache.all_table_names {
                match cache.tables.get(name) {
                    Some(info) if info.fully_loaded || !info.columns.is_empty() => {
                        let matching: Vec<ColumnInfo> = info
                            .columns
                            .iter()
                            .filter(|c| c.name.to_uppercase().contains(&needle))
                            .cloned()
                            .collect();
                        if !matching.is_empty() {
                            found.insert(name.clone(), matching);
                        }
                    }
                    _ => unloaded.push(name.clone()),
                }
            }
            (cache.all_table_names.clone(), found, unloaded)
        };

        if !unloaded.is_empty() {
            debug!(
                database = %self.database,
                tables = unloaded.len(),
                "Searching columns of unloaded tables at the source"
            );
            for (table, columns) in self.source.find_columns(&needle, &unloaded).await? {
                found.insert(table, columns);
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|name| found.remove(&name).map(|columns| (name, columns)))
            .take(limit)
            .collect())
    }

    /// Non-table objects of a type, optionally filtered by a SQL `LIKE` pattern.
    ///
    /// Listings are fetched once per type and kept in the object cache until
    /// the next rebuild.
    pub async fn get_objects(
        &self,
        object_type: &str,
        name_pattern: Option<&str>,
    ) -> Result<Vec<ObjectSummary>> {
        let object_type = object_type.trim().to_uppercase();
        let matcher = compile_filter(name_pattern)?;
        let objects: Vec<ObjectSummary> = self
            .cached_object(format!("objects:{}", object_type), || {
                self.source.list_objects(&object_type)
            })
            .await?;

        Ok(match matcher {
            Some(re) => objects.into_iter().filter(|o| re.is_match(&o.name)).collect(),
            None => objects,
        })
    }

    /// Source text of a stored object, `None` if the source has none.
    pub async fn get_object_source(&self, object_type: &str, name: &str) -> Result<Option<String>> {
        let object_type = object_type.trim().to_uppercase();
        let name = normalize_table_name(name);
        self.cached_object(format!("source:{}:{}", object_type, name), || {
            self.source.fetch_object_source(&object_type, &name)
        })
        .await
    }

    /// Objects that depend on a table or object.
    pub async fn get_dependent_objects(&self, name: &str) -> Result<Vec<ObjectSummary>> {
        let name = normalize_table_name(name);
        self.cached_object(format!("dependents:{}", name), || {
            self.source.fetch_dependents(&name)
        })
        .await
    }

    /// User-defined types, optionally filtered by a SQL `LIKE` pattern.
    pub async fn get_user_defined_types(
        &self,
        type_pattern: Option<&str>,
    ) -> Result<Vec<UserTypeInfo>> {
        let matcher = compile_filter(type_pattern)?;
        let types: Vec<UserTypeInfo> = self
            .cached_object("types".to_string(), || self.source.list_user_types())
            .await?;

        Ok(match matcher {
            Some(re) => types.into_iter().filter(|t| re.is_match(&t.name)).collect(),
            None => types,
        })
    }

    /// Vendor and version of the database.
    pub async fn get_vendor_info(&self) -> Result<Option<VendorInfo>> {
        self.cached_object("vendor_info".to_string(), || self.source.fetch_vendor_info())
            .await
    }

    /// Serve `key` from the object cache, fetching and storing it on a miss.
    ///
    /// A value fetched across a rebuild is returned but not stored.
    async fn cached_object<T, F, Fut>(&self, key: String, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cached = {
            let guard = self.cache.read().await;
            self.require(&guard)?.object_cache.get(&key).cloned()
        };

        if let Some(value) = cached {
            match serde_json::from_value(value) {
                Ok(value) => {
                    self.counters.hit();
                    return Ok(value);
                }
                Err(e) => {
                    warn!(database = %self.database, key = %key, error = %e, "Discarding unreadable object cache entry");
                }
            }
        }

        self.counters.miss();
        let generation = self.generation.load(Ordering::SeqCst);
        let value = fetch().await?;
        let payload = serde_json::to_value(&value)?;

        let stored = {
            let mut guard = self.cache.write().await;
            match guard.as_mut() {
                Some(cache) if self.generation.load(Ordering::SeqCst) == generation => {
                    cache.object_cache.insert(key, payload);
                    true
                }
                _ => false,
            }
        };
        if stored {
            if let Err(e) = self.persist().await {
                warn!(database = %self.database, error = %e, "Failed to persist schema cache");
            }
        }
        Ok(value)
    }

    // =========================================================================
    // Stats / Persistence
    // =========================================================================

    /// Size and usage counters.
    pub async fn get_cache_stats(&self) -> CacheStatsReport {
        let stats = self.counters.snapshot();
        let guard = self.cache.read().await;
        let cache = guard.as_ref();
        CacheStatsReport {
            database: self.database.clone(),
            size: cache.map_or(0, SchemaCache::len),
            loaded_entries: cache.map_or(0, |c| c.tables.len()),
            fully_loaded_count: cache.map_or(0, SchemaCache::fully_loaded_count),
            hits: stats.hits,
            misses: stats.misses,
            rebuilds: stats.rebuilds,
            promotions: stats.promotions,
            partial_failures: stats.partial_failures,
            object_keys: cache
                .map(|c| c.object_cache.keys().cloned().collect())
                .unwrap_or_default(),
            last_updated: cache.map(|c| c.last_updated),
            cache_file: self.cache_path.clone(),
        }
    }

    /// Copy of the current cache with up-to-date counters.
    pub async fn snapshot(&self) -> Option<SchemaCache> {
        let guard = self.cache.read().await;
        guard.as_ref().map(|cache| {
            let mut copy = cache.clone();
            copy.cache_stats = self.counters.snapshot();
            copy
        })
    }

    /// Stamp `last_updated` and write the current cache to its file.
    pub async fn persist(&self) -> Result<()> {
        let _order = self.persist_lock.lock().await;
        let bytes = {
            let mut guard = self.cache.write().await;
            match guard.as_mut() {
                Some(cache) => {
                    cache.touch();
                    cache.to_bytes_with_stats(&self.counters.snapshot())?
                }
                None => return Ok(()),
            }
        };
        let path = self.cache_path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| ServerError::internal(format!("cache persist task failed: {}", e)))??;
        debug!(database = %self.database, "Persisted schema cache to {}", self.cache_path.display());
        Ok(())
    }

    /// Persist if a cache is loaded.
    pub async fn flush(&self) -> Result<()> {
        if self.is_loaded().await {
            self.persist().await?;
        }
        Ok(())
    }
}

fn compile_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(like_pattern)
        .transpose()
}

/// Compile a SQL `LIKE` pattern (`%`, `_`) into a case-insensitive regex.
pub fn like_pattern(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ServerError::invalid_input(format!("bad name pattern: {}", e)))
}
