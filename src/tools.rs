//! Schema tools exposed to calling agents.
//!
//! Every tool except `list_databases` and `get_database_status` takes a
//! `database_name` that is resolved through the registry:
//!
//! - `list_databases`: Configured databases and their states
//! - `get_database_status`: State, cause and cache figures per database
//! - `get_table_schema`: Full profile of one table
//! - `get_tables_schema`: Profiles of a short list of tables
//! - `search_tables_schema`: Find tables by name fragments and show their profiles
//! - `search_columns`: Find columns by name fragment across every table
//! - `get_table_constraints`: PK / FK / UNIQUE / CHECK constraints
//! - `get_table_indexes`: Indexes with columns, uniqueness and status
//! - `get_related_tables`: Foreign-key neighbours in both directions
//! - `list_objects`: Non-table objects by type and name pattern
//! - `get_object_source`: Source text of one stored object
//! - `get_dependent_objects`: Objects that depend on a table or object
//! - `get_user_defined_types`: User-defined types with their attributes
//! - `get_database_vendor_info`: Vendor, version and schema of one database
//! - `get_all_database_info`: Vendor, version and schema of every database
//! - `rebuild_schema_cache`: Rebuild the table index
//! - `get_cache_stats`: Cache size and usage counters

mod inputs;

pub use inputs::*;

use crate::constants::{
    LOG_ARGUMENT_PREVIEW_LEN, MAX_BATCH_TABLES, MAX_COLUMN_SEARCH_TABLES, MAX_TABLE_SEARCH_RESULTS,
};
use crate::error::{Result, ServerError};
use crate::registry::{DatabaseEntry, SharedRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

static TERM_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[,\s]+")
        .unwrap_or_else(|e| panic!("Internal error: invalid search term separator: {}", e))
});

/// Parse the arguments into the handler's input type and run it.
macro_rules! with_input {
    ($self:ident . $handler:ident ( $arguments:expr )) => {
        match parse($arguments) {
            Ok(input) => $self.$handler(input).await,
            Err(e) => Err(e),
        }
    };
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    fn from_error(err: &ServerError) -> Self {
        match err.suggestion() {
            Some(hint) => Self::error(format!("{}\nSuggestion: {}", err, hint)),
            None => Self::error(err.to_string()),
        }
    }

    /// Turn a handler result into output, rendering errors as error text.
    pub fn from_result(result: Result<ToolOutput>) -> Self {
        result.unwrap_or_else(|e| Self::from_error(&e))
    }
}

fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ServerError::invalid_input(e.to_string()))
}

fn preview(arguments: &Value) -> String {
    let text = arguments.to_string();
    if text.chars().count() > LOG_ARGUMENT_PREVIEW_LEN {
        let cut: String = text.chars().take(LOG_ARGUMENT_PREVIEW_LEN).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<ToolOutput> {
    Ok(ToolOutput::text(serde_json::to_string_pretty(value)?))
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "Unknown"
    } else {
        value
    }
}

/// Split a search string on commas and whitespace.
pub fn split_search_terms(search: &str) -> Vec<String> {
    TERM_SEPARATOR
        .split(search)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tool dispatcher over a database registry.
#[derive(Clone)]
pub struct SchemaTools {
    registry: SharedRegistry,
}

impl SchemaTools {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Resolve a database that has a usable configuration.
    fn usable_entry(&self, name: &str) -> Result<Arc<DatabaseEntry>> {
        let entry = self.registry.resolve(name)?;
        match entry.config_error() {
            Some(reason) => Err(ServerError::config(format!(
                "database '{}' is not usable: {}",
                name, reason
            ))),
            None => Ok(entry),
        }
    }

    /// Dispatch a tool call by name.
    ///
    /// Failures, including unknown tools and malformed arguments, come back
    /// as an error output rather than an `Err`.
    pub async fn call(&self, name: &str, arguments: Value) -> ToolOutput {
        let call_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let start = Instant::now();
        debug!(call_id = %call_id, tool = name, arguments = %preview(&arguments), "Tool call");

        let result = match name {
            "list_databases" => self.list_databases(),
            "get_database_status" => with_input!(self.get_database_status(arguments)),
            "get_table_schema" => with_input!(self.get_table_schema(arguments)),
            "get_tables_schema" => with_input!(self.get_tables_schema(arguments)),
            "search_tables_schema" => with_input!(self.search_tables_schema(arguments)),
            "search_columns" => with_input!(self.search_columns(arguments)),
            "get_table_constraints" => with_input!(self.get_table_constraints(arguments)),
            "get_table_indexes" => with_input!(self.get_table_indexes(arguments)),
            "get_related_tables" => with_input!(self.get_related_tables(arguments)),
            "list_objects" => with_input!(self.list_objects(arguments)),
            "get_object_source" => with_input!(self.get_object_source(arguments)),
            "get_dependent_objects" => with_input!(self.get_dependent_objects(arguments)),
            "get_user_defined_types" => with_input!(self.get_user_defined_types(arguments)),
            "get_database_vendor_info" => with_input!(self.get_database_vendor_info(arguments)),
            "get_all_database_info" => self.get_all_database_info().await,
            "rebuild_schema_cache" => with_input!(self.rebuild_schema_cache(arguments)),
            "get_cache_stats" => with_input!(self.get_cache_stats(arguments)),
            other => Err(ServerError::invalid_input(format!(
                "unknown tool '{}'",
                other
            ))),
        };

        let output = ToolOutput::from_result(result);
        debug!(
            call_id = %call_id,
            tool = name,
            is_error = output.is_error,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        output
    }

    // =========================================================================
    // Registry Tools
    // =========================================================================

    /// List configured databases.
    pub fn list_databases(&self) -> Result<ToolOutput> {
        let statuses = self.registry.statuses();
        if statuses.is_empty() {
            return Ok(ToolOutput::text("No databases configured."));
        }

        let mut lines = vec![format!("Configured databases ({}):", statuses.len())];
        for status in statuses {
            let mut line = format!("- {} [{}]", status.name, status.state);
            if let Some(schema) = &status.schema {
                line.push_str(&format!(" schema {}", schema));
            }
            if let Some(cause) = &status.cause {
                line.push_str(&format!(": {}", cause));
            }
            lines.push(line);
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// Report state and cache figures.
    pub async fn get_database_status(&self, input: DatabaseStatusInput) -> Result<ToolOutput> {
        let entries = match &input.database_name {
            Some(name) => vec![self.registry.resolve(name)?],
            None => self
                .registry
                .list_databases()
                .iter()
                .map(|n| self.registry.resolve(n))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut report = Vec::with_capacity(entries.len());
        for entry in entries {
            report.push(json!({
                "status": entry.status(),
                "source": entry.source().source_name(),
                "cache": entry.manager().get_cache_stats().await,
            }));
        }
        to_json(&report)
    }

    // =========================================================================
    // Table Tools
    // =========================================================================

    /// Describe one table.
    pub async fn get_table_schema(&self, input: TableInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        match entry.manager().get_schema_info(&input.table_name).await? {
            Some(info) => Ok(ToolOutput::text(info.format_schema())),
            None => Ok(ToolOutput::text(format!(
                "Table '{}' not found in database '{}'.",
                input.table_name, input.database_name
            ))),
        }
    }

    /// Describe several tables.
    pub async fn get_tables_schema(&self, input: TablesInput) -> Result<ToolOutput> {
        if input.table_names.len() > MAX_BATCH_TABLES {
            return Err(ServerError::invalid_input(format!(
                "at most {} tables per call, got {}",
                MAX_BATCH_TABLES,
                input.table_names.len()
            )));
        }

        let entry = self.usable_entry(&input.database_name)?;
        let mut results = Vec::with_capacity(input.table_names.len());
        for table in &input.table_names {
            match entry.manager().get_schema_info(table).await? {
                Some(info) => results.push(info.format_schema()),
                None => results.push(format!(
                    "Table '{}' not found in database '{}'.\n",
                    table, input.database_name
                )),
            }
        }
        Ok(ToolOutput::text(results.join("\n")))
    }

    /// Find tables by name fragments and describe them.
    pub async fn search_tables_schema(&self, input: SearchInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let terms = split_search_terms(&input.search_term);
        if terms.is_empty() {
            return Ok(ToolOutput::text("No valid search terms provided"));
        }

        let mut matches: Vec<String> = Vec::new();
        for term in &terms {
            for name in entry
                .manager()
                .search_tables(term, MAX_TABLE_SEARCH_RESULTS)
                .await?
            {
                if !matches.contains(&name) {
                    matches.push(name);
                }
            }
        }

        if matches.is_empty() {
            return Ok(ToolOutput::text(format!(
                "No tables found in '{}' matching any of these terms: {}",
                input.database_name,
                terms.join(", ")
            )));
        }

        let total = matches.len();
        let header = if total > MAX_TABLE_SEARCH_RESULTS {
            format!(
                "Found {} tables in '{}' matching terms ({}). Returning the first {}:",
                total,
                input.database_name,
                terms.join(", "),
                MAX_TABLE_SEARCH_RESULTS
            )
        } else {
            format!(
                "Found {} tables in '{}' matching terms ({}):",
                total,
                input.database_name,
                terms.join(", ")
            )
        };

        let mut results = vec![header];
        for name in matches.iter().take(MAX_TABLE_SEARCH_RESULTS) {
            if let Some(info) = entry.manager().get_schema_info(name).await? {
                results.push(info.format_schema());
            }
        }
        Ok(ToolOutput::text(results.join("\n")))
    }

    /// Find columns by name fragment.
    pub async fn search_columns(&self, input: SearchInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let found = entry
            .manager()
            .search_columns(&input.search_term, MAX_COLUMN_SEARCH_TABLES)
            .await?;

        if found.is_empty() {
            return Ok(ToolOutput::text(format!(
                "No columns found in '{}' matching '{}'",
                input.database_name, input.search_term
            )));
        }

        let mut lines = vec![format!(
            "Found columns matching '{}' in {} tables in '{}':",
            input.search_term,
            found.len(),
            input.database_name
        )];
        for (table, columns) in found {
            lines.push(format!("\nTable: {}", table));
            lines.push("Matching columns:".to_string());
            for col in columns {
                let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
                lines.push(format!("  - {}: {} {}", col.name, col.type_display(), nullable));
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// List constraints of a table.
    pub async fn get_table_constraints(&self, input: TableInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let constraints = match entry.manager().get_table_constraints(&input.table_name).await? {
            Some(c) if !c.is_empty() => c,
            _ => {
                return Ok(ToolOutput::text(format!(
                    "No constraints found for table '{}' in database '{}'",
                    input.table_name, input.database_name
                )))
            }
        };

        let mut lines = vec![format!("Constraints for table '{}':", input.table_name)];
        for c in constraints {
            lines.push(format!("\n{} Constraint: {}", c.constraint_type, c.name));
            if !c.columns.is_empty() {
                lines.push(format!("Columns: {}", c.columns.join(", ")));
            }
            if let Some(r) = &c.references {
                lines.push(format!("References: {}({})", r.table, r.columns.join(", ")));
            }
            if let Some(cond) = &c.condition {
                lines.push(format!("Condition: {}", cond));
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// List indexes of a table.
    pub async fn get_table_indexes(&self, input: TableInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let indexes = match entry.manager().get_table_indexes(&input.table_name).await? {
            Some(i) if !i.is_empty() => i,
            _ => {
                return Ok(ToolOutput::text(format!(
                    "No indexes found for table '{}' in database '{}'",
                    input.table_name, input.database_name
                )))
            }
        };

        let mut lines = vec![format!("Indexes for table '{}':", input.table_name)];
        for idx in indexes {
            let unique = if idx.unique { "UNIQUE " } else { "" };
            lines.push(format!("\n{}Index: {}", unique, idx.name));
            lines.push(format!("Columns: {}", idx.columns.join(", ")));
            if let Some(ts) = &idx.tablespace {
                lines.push(format!("Tablespace: {}", ts));
            }
            lines.push(format!("Status: {}", idx.status));
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// List foreign-key neighbours of a table.
    pub async fn get_related_tables(&self, input: TableInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let related = match entry.manager().get_related_tables(&input.table_name).await? {
            Some(r) if !r.is_empty() => r,
            _ => {
                return Ok(ToolOutput::text(format!(
                    "No related tables found for '{}' in database '{}'",
                    input.table_name, input.database_name
                )))
            }
        };

        let mut lines = vec![format!(
            "Tables related to '{}' in '{}':",
            input.table_name, input.database_name
        )];
        if !related.referenced_tables.is_empty() {
            lines.push("\nTables referenced by this table (outgoing foreign keys):".to_string());
            lines.extend(related.referenced_tables.iter().map(|t| format!("  - {}", t)));
        }
        if !related.referencing_tables.is_empty() {
            lines.push("\nTables that reference this table (incoming foreign keys):".to_string());
            lines.extend(related.referencing_tables.iter().map(|t| format!("  - {}", t)));
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    // =========================================================================
    // Object and Cache Tools
    // =========================================================================

    /// List non-table objects.
    pub async fn list_objects(&self, input: ListObjectsInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let object_type = input.object_type.trim().to_uppercase();
        let objects = entry
            .manager()
            .get_objects(&object_type, input.name_pattern.as_deref())
            .await?;

        if objects.is_empty() {
            let pattern = input
                .name_pattern
                .as_deref()
                .map(|p| format!(" matching '{}'", p))
                .unwrap_or_default();
            return Ok(ToolOutput::text(format!(
                "No {} objects found in '{}'{}",
                object_type, input.database_name, pattern
            )));
        }

        let mut lines = vec![format!("Found {} {} objects:", objects.len(), object_type)];
        for obj in objects {
            lines.push(format!("\n{}: {}", obj.object_type, obj.name));
            if let Some(owner) = &obj.owner {
                lines.push(format!("Owner: {}", owner));
            }
            if let Some(status) = &obj.status {
                lines.push(format!("Status: {}", status));
            }
            if let Some(created) = &obj.created {
                lines.push(format!("Created: {}", created));
            }
            if let Some(modified) = &obj.last_modified {
                lines.push(format!("Last Modified: {}", modified));
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// Show the source text of a stored object.
    pub async fn get_object_source(&self, input: ObjectSourceInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let object_type = input.object_type.trim().to_uppercase();
        let object_name = input.object_name.trim().to_uppercase();
        match entry
            .manager()
            .get_object_source(&object_type, &object_name)
            .await?
        {
            Some(source) => Ok(ToolOutput::text(format!(
                "Source for {} {} in '{}':\n\n{}",
                object_type, object_name, input.database_name, source
            ))),
            None => Ok(ToolOutput::text(format!(
                "No source found for {} {} in database '{}'",
                object_type, object_name, input.database_name
            ))),
        }
    }

    /// List objects depending on a table or object.
    pub async fn get_dependent_objects(&self, input: ObjectInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let dependents = entry
            .manager()
            .get_dependent_objects(&input.object_name)
            .await?;

        if dependents.is_empty() {
            return Ok(ToolOutput::text(format!(
                "No objects found that depend on '{}' in database '{}'",
                input.object_name, input.database_name
            )));
        }

        let mut lines = vec![format!(
            "Objects that depend on '{}' in '{}':",
            input.object_name, input.database_name
        )];
        for dep in dependents {
            lines.push(format!("\n{}: {}", dep.object_type, dep.name));
            if let Some(owner) = &dep.owner {
                lines.push(format!("Owner: {}", owner));
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// List user-defined types.
    pub async fn get_user_defined_types(&self, input: TypesInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let types = entry
            .manager()
            .get_user_defined_types(input.type_pattern.as_deref())
            .await?;

        if types.is_empty() {
            let pattern = input
                .type_pattern
                .as_deref()
                .map(|p| format!(" matching '{}'", p))
                .unwrap_or_default();
            return Ok(ToolOutput::text(format!(
                "No user-defined types found in '{}'{}",
                input.database_name, pattern
            )));
        }

        let mut lines = vec![format!("User-defined types in '{}':", input.database_name)];
        for t in types {
            lines.push(format!("\nType: {}", t.name));
            lines.push(format!("Type category: {}", t.type_category));
            if let Some(owner) = &t.owner {
                lines.push(format!("Owner: {}", owner));
            }
            if !t.attributes.is_empty() {
                lines.push("Attributes:".to_string());
                for attr in &t.attributes {
                    lines.push(format!("  - {}: {}", attr.name, attr.data_type));
                }
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// Show vendor, version and schema of one database.
    pub async fn get_database_vendor_info(&self, input: DatabaseInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        let Some(info) = entry.manager().get_vendor_info().await? else {
            return Ok(ToolOutput::text(format!(
                "Could not retrieve database vendor information for '{}'.",
                input.database_name
            )));
        };

        let mut lines = vec![
            format!("Database: {}", input.database_name),
            format!("Vendor: {}", info.vendor),
            format!("Version: {}", info.version),
        ];
        if let Some(schema) = info.schema.as_deref().or(entry.schema()) {
            lines.push(format!("Schema: {}", schema));
        }
        if !info.additional_info.is_empty() {
            lines.push("\nAdditional Version Information:".to_string());
            lines.extend(info.additional_info.iter().map(|i| format!("- {}", i)));
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// Show vendor, version and schema of every database.
    ///
    /// A database that cannot answer is listed with its error.
    pub async fn get_all_database_info(&self) -> Result<ToolOutput> {
        let mut lines = vec!["Database Information:\n".to_string()];
        for name in self.registry.list_databases() {
            let entry = self.registry.resolve(&name)?;
            lines.push(format!("\n{}:", name));
            match entry.manager().get_vendor_info().await {
                Ok(info) => {
                    let info = info.unwrap_or_default();
                    lines.push(format!("  Vendor: {}", or_unknown(&info.vendor)));
                    lines.push(format!("  Version: {}", or_unknown(&info.version)));
                    lines.push(format!(
                        "  Schema: {}",
                        info.schema.as_deref().or(entry.schema()).unwrap_or("Unknown")
                    ));
                }
                Err(e) => {
                    let cause = entry.status().cause.unwrap_or_else(|| e.to_string());
                    lines.push(format!("  Error: {}", cause));
                }
            }
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }

    /// Rebuild a database's schema index.
    pub async fn rebuild_schema_cache(&self, input: RebuildInput) -> Result<ToolOutput> {
        let mode = if input.fetch_all_metadata {
            "with complete metadata"
        } else {
            "with lazy loading"
        };
        info!(database = %input.database_name, "Rebuilding schema cache {}", mode);

        let outcome = match self
            .registry
            .rebuild(&input.database_name, input.fetch_all_metadata)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => {
                return Ok(ToolOutput::error(format!(
                    "Failed to rebuild cache for '{}': {}",
                    input.database_name, e
                )))
            }
        };

        let mut text = format!(
            "Schema cache for '{}' rebuilt successfully in {:.2} seconds.\nIndexed {} tables ({} with full metadata).",
            input.database_name,
            outcome.elapsed.as_secs_f64(),
            outcome.tables,
            outcome.fully_loaded
        );
        if outcome.is_partial() {
            text.push_str(&format!(
                "\n{} tables could not be fully loaded and will be retried on first use: {}",
                outcome.partial_failures.len(),
                outcome.partial_failures.join(", ")
            ));
        }
        Ok(ToolOutput::text(text))
    }

    /// Report cache figures for a database.
    pub async fn get_cache_stats(&self, input: DatabaseInput) -> Result<ToolOutput> {
        let entry = self.usable_entry(&input.database_name)?;
        to_json(&entry.manager().get_cache_stats().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_search_terms() {
        assert_eq!(split_search_terms("emp, dept  loc"), vec!["emp", "dept", "loc"]);
        assert!(split_search_terms(" , ").is_empty());
    }

    #[test]
    fn test_from_result() {
        let ok = ToolOutput::from_result(Ok(ToolOutput::text("done")));
        assert!(!ok.is_error);
        let err = ToolOutput::from_result(Err(ServerError::invalid_input("missing table_name")));
        assert!(err.is_error);
        assert!(err.text.contains("missing table_name"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = json!({"search_term": "x".repeat(500)});
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), LOG_ARGUMENT_PREVIEW_LEN + 3);
    }

    #[test]
    fn test_error_output_carries_suggestion() {
        let out = ToolOutput::from_error(&ServerError::database_not_found("x", vec!["hr".into()]));
        assert!(out.is_error);
        assert!(out.text.contains("Available databases: hr"));
        assert!(out.text.contains("Suggestion:"));
    }

    #[test]
    fn test_parse_null_arguments() {
        let input: DatabaseStatusInput = parse(Value::Null).unwrap();
        assert!(input.database_name.is_none());
        assert!(parse::<TableInput>(json!({"database_name": "hr"})).is_err());
    }
}
