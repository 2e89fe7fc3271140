//! Registry of configured databases.
//!
//! Each registered database owns a metadata source and a [`SchemaManager`].
//! Every tool call names a database and is routed through
//! [`DatabaseRegistry::resolve`]. Entries are created once at startup and
//! live for the process lifetime. A database whose settings are invalid is
//! still registered, held FAILED with the configuration error as its cause.
//!
//! Per-database state machine:
//!
//! ```text
//! UNINITIALIZED -> INITIALIZING -> READY | DEGRADED | FAILED
//! READY | DEGRADED | FAILED -> INITIALIZING   (load or rebuild)
//! ```

use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::schema::{LoadOutcome, SchemaManager};
use crate::source::{RetryingSource, SharedSource, SnapshotSource, UnconfiguredSource};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lifecycle state of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseState {
    /// Registered, no load attempted yet.
    Uninitialized,
    /// A load or rebuild is running.
    Initializing,
    /// Cache loaded completely.
    Ready,
    /// Usable for the tables already known; the last build had failures.
    Degraded,
    /// No usable cache.
    Failed,
}

impl DatabaseState {
    /// Whether lookups can be served.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

impl std::fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseState::Uninitialized => write!(f, "UNINITIALIZED"),
            DatabaseState::Initializing => write!(f, "INITIALIZING"),
            DatabaseState::Ready => write!(f, "READY"),
            DatabaseState::Degraded => write!(f, "DEGRADED"),
            DatabaseState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status of one database as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    /// Registered name.
    pub name: String,

    /// Owning schema, if configured.
    pub schema: Option<String>,

    /// Current lifecycle state.
    pub state: DatabaseState,

    /// Why the database is degraded or failed.
    pub cause: Option<String>,

    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

/// A registered database.
pub struct DatabaseEntry {
    name: String,
    schema: Option<String>,
    source: SharedSource,
    manager: Arc<SchemaManager>,
    /// Configuration error that keeps this database FAILED.
    config_error: Option<String>,
    status: parking_lot::RwLock<DatabaseStatus>,
}

impl std::fmt::Debug for DatabaseEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseEntry")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("config_error", &self.config_error)
            .finish_non_exhaustive()
    }
}

impl DatabaseEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn manager(&self) -> &Arc<SchemaManager> {
        &self.manager
    }

    pub fn status(&self) -> DatabaseStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> DatabaseState {
        self.status.read().state
    }

    fn transition(&self, state: DatabaseState, cause: Option<String>) {
        let mut status = self.status.write();
        let from = status.state;
        status.state = state;
        status.cause = cause;
        status.updated_at = Utc::now();
        match state {
            DatabaseState::Failed => error!(
                database = %self.name,
                cause = status.cause.as_deref().unwrap_or(""),
                "Database state {} -> {}", from, state
            ),
            DatabaseState::Degraded => warn!(
                database = %self.name,
                cause = status.cause.as_deref().unwrap_or(""),
                "Database state {} -> {}", from, state
            ),
            _ => info!(database = %self.name, "Database state {} -> {}", from, state),
        }
    }

    /// The configuration error, if the database cannot be loaded at all.
    pub fn config_error(&self) -> Option<&str> {
        self.config_error.as_deref()
    }

    async fn initialize(&self, fetch_all: bool) -> DatabaseOutcome {
        let load = match &self.config_error {
            Some(reason) => {
                self.transition(DatabaseState::Failed, Some(reason.clone()));
                None
            }
            None => {
                self.transition(DatabaseState::Initializing, None);
                let result = self.manager.load_or_build_cache(false, fetch_all).await;
                self.settle(result).await.ok()
            }
        };
        let status = self.status();
        DatabaseOutcome {
            name: self.name.clone(),
            state: status.state,
            cause: status.cause,
            load,
        }
    }

    /// Drive the state machine from the result of a load or rebuild.
    async fn settle(&self, result: Result<LoadOutcome>) -> Result<LoadOutcome> {
        match result {
            Ok(outcome) => {
                if outcome.is_partial() {
                    self.transition(
                        DatabaseState::Degraded,
                        Some(format!(
                            "{} tables partially loaded: {}",
                            outcome.partial_failures.len(),
                            outcome.partial_failures.join(", ")
                        )),
                    );
                } else {
                    self.transition(DatabaseState::Ready, None);
                }
                Ok(outcome)
            }
            Err(e) => {
                let state = if self.manager.is_loaded().await {
                    DatabaseState::Degraded
                } else {
                    DatabaseState::Failed
                };
                self.transition(state, Some(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Per-database result of [`DatabaseRegistry::initialize_all`].
#[derive(Debug, Serialize)]
pub struct DatabaseOutcome {
    pub name: String,
    pub state: DatabaseState,
    pub cause: Option<String>,
    pub load: Option<LoadOutcome>,
}

/// Registry-wide readiness after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Every database is READY.
    Ready,
    /// At least one database is usable.
    PartialSuccess,
    /// No database is usable.
    TotalFailure,
}

/// Result of initializing every database.
#[derive(Debug, Serialize)]
pub struct InitializationReport {
    pub outcomes: Vec<DatabaseOutcome>,
    pub readiness: Readiness,
}

/// Shared registry handle.
pub type SharedRegistry = Arc<DatabaseRegistry>;

/// Routes requests to per-database schema managers.
#[derive(Default)]
pub struct DatabaseRegistry {
    entries: Vec<Arc<DatabaseEntry>>,
    index: HashMap<String, usize>,
    fetch_all_on_startup: bool,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one snapshot-backed source per configured
    /// database, in `DB_NAMES` order.
    ///
    /// Databases with invalid settings are registered FAILED.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        registry.fetch_all_on_startup = config.cache.fetch_all_on_startup;

        for name in &config.declared {
            if let Some(db) = config.databases.iter().find(|d| &d.name == name) {
                let snapshot: SharedSource = Arc::new(SnapshotSource::from_file(&db.metadata_file));
                let source: SharedSource =
                    Arc::new(RetryingSource::new(snapshot, config.retry.clone()));
                let manager =
                    Arc::new(SchemaManager::new(&db.name, source.clone(), &config.cache.dir));
                registry.register(&db.name, source, manager, db.schema.clone())?;
            } else if let Some(invalid) = config.invalid.iter().find(|d| &d.name == name) {
                registry.register_unconfigured(&invalid.name, &invalid.reason, &config.cache.dir)?;
            }
        }

        Ok(registry)
    }

    /// Register a database. Fails if the name is already taken.
    pub fn register(
        &mut self,
        name: &str,
        source: SharedSource,
        manager: Arc<SchemaManager>,
        schema: Option<String>,
    ) -> Result<()> {
        self.insert(name, source, manager, schema, None)
    }

    /// Register a database that cannot be used because of its settings.
    ///
    /// The entry starts FAILED with `reason` as cause and never loads.
    pub fn register_unconfigured(&mut self, name: &str, reason: &str, cache_dir: &Path) -> Result<()> {
        let source: SharedSource = Arc::new(UnconfiguredSource::new(name, reason));
        let manager = Arc::new(SchemaManager::new(name, source.clone(), cache_dir));
        self.insert(name, source, manager, None, Some(reason.to_string()))?;
        error!(database = %name, cause = %reason, "Database registered as FAILED");
        Ok(())
    }

    fn insert(
        &mut self,
        name: &str,
        source: SharedSource,
        manager: Arc<SchemaManager>,
        schema: Option<String>,
        config_error: Option<String>,
    ) -> Result<()> {
        if self.index.contains_key(name) {
            return Err(ServerError::config(format!(
                "database '{}' is already registered",
                name
            )));
        }

        let state = if config_error.is_some() {
            DatabaseState::Failed
        } else {
            DatabaseState::Uninitialized
        };
        let entry = DatabaseEntry {
            name: name.to_string(),
            schema: schema.clone(),
            source,
            manager,
            config_error: config_error.clone(),
            status: parking_lot::RwLock::new(DatabaseStatus {
                name: name.to_string(),
                schema,
                state,
                cause: config_error,
                updated_at: Utc::now(),
            }),
        };
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(Arc::new(entry));
        info!(database = %name, "Registered database");
        Ok(())
    }

    /// Look up a database by exact name.
    pub fn resolve(&self, name: &str) -> Result<Arc<DatabaseEntry>> {
        self.index
            .get(name)
            .map(|&i| self.entries[i].clone())
            .ok_or_else(|| ServerError::database_not_found(name, self.list_databases()))
    }

    /// Configured names in registration order.
    pub fn list_databases(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, name: &str) -> Result<DatabaseStatus> {
        Ok(self.resolve(name)?.status())
    }

    pub fn statuses(&self) -> Vec<DatabaseStatus> {
        self.entries.iter().map(|e| e.status()).collect()
    }

    /// Load or build every database's cache, one task per database.
    ///
    /// A failing database is recorded and does not stop the others. Outcomes
    /// are in registration order.
    pub async fn initialize_all(&self) -> InitializationReport {
        let fetch_all = self.fetch_all_on_startup;
        let handles: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                let entry = entry.clone();
                tokio::spawn(async move { entry.initialize(fetch_all).await })
            })
            .collect();

        let outcomes: Vec<DatabaseOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(&self.entries)
            .map(|(joined, entry)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    entry.transition(
                        DatabaseState::Failed,
                        Some(format!("initialization task failed: {}", e)),
                    );
                    let status = entry.status();
                    DatabaseOutcome {
                        name: entry.name.clone(),
                        state: status.state,
                        cause: status.cause,
                        load: None,
                    }
                }
            })
            .collect();

        let usable = outcomes.iter().filter(|o| o.state.is_usable()).count();
        let readiness = if !outcomes.is_empty()
            && outcomes.iter().all(|o| o.state == DatabaseState::Ready)
        {
            Readiness::Ready
        } else if usable > 0 {
            Readiness::PartialSuccess
        } else {
            Readiness::TotalFailure
        };

        info!(
            databases = outcomes.len(),
            usable,
            readiness = ?readiness,
            "Registry initialization finished"
        );

        InitializationReport {
            outcomes,
            readiness,
        }
    }

    /// Rebuild one database's cache and update its state.
    pub async fn rebuild(&self, name: &str, fetch_all_metadata: bool) -> Result<LoadOutcome> {
        let entry = self.resolve(name)?;
        if let Some(reason) = &entry.config_error {
            return Err(ServerError::config(reason.clone()));
        }
        entry.transition(DatabaseState::Initializing, None);
        let result = entry.manager.rebuild_cache(fetch_all_metadata).await;
        entry.settle(result).await
    }

    /// Persist every loaded cache. Returns the databases that failed.
    pub async fn flush_all(&self) -> Vec<(String, ServerError)> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            if let Err(e) = entry.manager.flush().await {
                warn!(database = %entry.name, error = %e, "Failed to flush schema cache");
                failures.push((entry.name.clone(), e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::snapshot::Snapshot;

    fn hr_source() -> SharedSource {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "tables": [{"name": "EMPLOYEES"}, {"name": "DEPARTMENTS"}]
        }))
        .unwrap();
        Arc::new(SnapshotSource::from_snapshot("hr", snapshot))
    }

    fn register(registry: &mut DatabaseRegistry, name: &str, dir: &std::path::Path) -> Result<()> {
        let source = hr_source();
        let manager = Arc::new(SchemaManager::new(name, source.clone(), dir));
        registry.register(name, source, manager, None)
    }

    #[test]
    fn test_register_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();
        register(&mut registry, "sales", dir.path()).unwrap();

        assert_eq!(registry.list_databases(), vec!["hr", "sales"]);
        assert_eq!(registry.resolve("hr").unwrap().name(), "hr");
        assert_eq!(registry.status("sales").unwrap().state, DatabaseState::Uninitialized);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();
        let err = register(&mut registry, "hr", dir.path()).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_is_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();

        let err = registry.resolve("HR").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("hr"));
    }

    #[tokio::test]
    async fn test_initialize_all_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();

        let report = registry.initialize_all().await;
        assert_eq!(report.readiness, Readiness::Ready);
        assert_eq!(report.outcomes[0].state, DatabaseState::Ready);
        assert_eq!(report.outcomes[0].load.as_ref().map(|l| l.tables), Some(2));
        assert!(registry.flush_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_missing_snapshot_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();

        let broken: SharedSource = Arc::new(SnapshotSource::from_file(dir.path().join("absent.json")));
        let manager = Arc::new(SchemaManager::new("sales", broken.clone(), dir.path()));
        registry.register("sales", broken, manager, None).unwrap();

        let report = registry.initialize_all().await;
        assert_eq!(report.readiness, Readiness::PartialSuccess);
        let sales = registry.status("sales").unwrap();
        assert_eq!(sales.state, DatabaseState::Failed);
        assert!(sales.cause.unwrap().contains("absent.json"));
        assert_eq!(registry.status("hr").unwrap().state, DatabaseState::Ready);
    }

    #[tokio::test]
    async fn test_unconfigured_database_is_failed_with_cause() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();
        register(&mut registry, "hr", dir.path()).unwrap();
        registry
            .register_unconfigured("sales", "DB_SALES_METADATA_FILE is not set", dir.path())
            .unwrap();

        let before = registry.status("sales").unwrap();
        assert_eq!(before.state, DatabaseState::Failed);
        assert!(before.cause.unwrap().contains("DB_SALES_METADATA_FILE"));

        let report = registry.initialize_all().await;
        assert_eq!(report.readiness, Readiness::PartialSuccess);
        assert_eq!(report.outcomes[1].name, "sales");
        assert_eq!(report.outcomes[1].state, DatabaseState::Failed);
        assert!(report.outcomes[1].load.is_none());

        let err = registry.rebuild("sales", false).await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(!registry.resolve("sales").unwrap().manager().is_loaded().await);
    }

    struct PanickingSource;

    #[async_trait::async_trait]
    impl crate::source::MetadataSource for PanickingSource {
        fn source_name(&self) -> &str {
            "panicking"
        }

        async fn list_table_names(&self) -> Result<Vec<String>> {
            panic!("driver crashed while listing tables");
        }

        async fn fetch_columns(&self, _table: &str) -> Result<Vec<crate::schema::ColumnInfo>> {
            Ok(Vec::new())
        }

        async fn fetch_relationships(&self, _table: &str) -> Result<crate::schema::RelationshipMap> {
            Ok(Default::default())
        }

        async fn fetch_constraints(&self, _table: &str) -> Result<Vec<crate::schema::ConstraintInfo>> {
            Ok(Vec::new())
        }

        async fn fetch_indexes(&self, _table: &str) -> Result<Vec<crate::schema::IndexInfo>> {
            Ok(Vec::new())
        }

        async fn fetch_stats(&self, _table: &str) -> Result<Option<crate::schema::TableStats>> {
            Ok(None)
        }

        async fn fetch_comments(&self, _table: &str) -> Result<Option<crate::schema::TableComments>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_panicking_database_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DatabaseRegistry::new();

        let crashing: SharedSource = Arc::new(PanickingSource);
        let manager = Arc::new(SchemaManager::new("legacy", crashing.clone(), dir.path()));
        registry.register("legacy", crashing, manager, None).unwrap();
        register(&mut registry, "hr", dir.path()).unwrap();

        let report = registry.initialize_all().await;
        assert_eq!(report.readiness, Readiness::PartialSuccess);
        assert_eq!(report.outcomes[0].name, "legacy");
        assert_eq!(report.outcomes[0].state, DatabaseState::Failed);
        assert!(report.outcomes[0]
            .cause
            .as_deref()
            .unwrap()
            .contains("initialization task failed"));
        assert_eq!(report.outcomes[1].name, "hr");
        assert_eq!(report.outcomes[1].state, DatabaseState::Ready);
        assert_eq!(registry.status("legacy").unwrap().state, DatabaseState::Failed);
    }

    #[tokio::test]
    async fn test_empty_registry_is_total_failure() {
        let report = DatabaseRegistry::new().initialize_all().await;
        assert_eq!(report.readiness, Readiness::TotalFailure);
    }
}
