//! Tool input types with JSON Schema generation.

use mcpkit::ToolInput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for tools that take no arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct NoInput {}

/// Input for the `get_database_status` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct DatabaseStatusInput {
    /// Database to report on; all databases when omitted.
    #[serde(default)]
    #[schemars(description = "Database name (default: all configured databases)")]
    pub database_name: Option<String>,
}

/// Input for tools that operate on a whole database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct DatabaseInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,
}

/// Input for tools that operate on one table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct TableInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[schemars(description = "Table name (case-insensitive)")]
    pub table_name: String,
}

/// Input for the `get_tables_schema` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct TablesInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[schemars(description = "Table names to describe (at most 50)")]
    pub table_names: Vec<String>,
}

/// Input for the search tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct SearchInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    /// Fragment(s) to look for. Table search splits on commas and whitespace
    /// and matches any term.
    #[schemars(description = "Name fragment(s) to search for (case-insensitive)")]
    pub search_term: String,
}

/// Input for the `list_objects` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ListObjectsInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[schemars(description = "Object type: PROCEDURE, FUNCTION, PACKAGE, TRIGGER, VIEW, ...")]
    pub object_type: String,

    #[serde(default)]
    #[schemars(description = "Optional SQL LIKE pattern for object names (% and _ wildcards)")]
    pub name_pattern: Option<String>,
}

/// Input for the `get_object_source` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ObjectSourceInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[schemars(description = "Object type: PROCEDURE, FUNCTION, PACKAGE, TRIGGER, VIEW, ...")]
    pub object_type: String,

    #[schemars(description = "Object name (case-insensitive)")]
    pub object_name: String,
}

/// Input for the `get_dependent_objects` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct ObjectInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[schemars(description = "Table or object name (case-insensitive)")]
    pub object_name: String,
}

/// Input for the `get_user_defined_types` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct TypesInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    #[serde(default)]
    #[schemars(description = "Optional SQL LIKE pattern for type names (% and _ wildcards)")]
    pub type_pattern: Option<String>,
}

/// Input for the `rebuild_schema_cache` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToolInput)]
pub struct RebuildInput {
    #[schemars(description = "Name of the configured database")]
    pub database_name: String,

    /// Fetch complete metadata for every table instead of indexing names only.
    #[serde(default)]
    #[schemars(
        description = "Fetch columns, relationships, constraints, indexes, statistics and comments for ALL tables now (slow). Default false: index names and load details on first use"
    )]
    pub fetch_all_metadata: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_input_defaults() {
        let input: RebuildInput = serde_json::from_str(r#"{"database_name": "hr"}"#).unwrap();
        assert!(!input.fetch_all_metadata);
    }

    #[test]
    fn test_list_objects_pattern_optional() {
        let input: ListObjectsInput =
            serde_json::from_str(r#"{"database_name": "hr", "object_type": "procedure"}"#)
                .unwrap();
        assert!(input.name_pattern.is_none());
    }

    #[test]
    fn test_type_pattern_optional() {
        let input: TypesInput = serde_json::from_str(r#"{"database_name": "hr"}"#).unwrap();
        assert!(input.type_pattern.is_none());
        assert!(serde_json::from_str::<ObjectSourceInput>(r#"{"database_name": "hr", "object_name": "X"}"#).is_err());
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(TableInput)).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("database_name")));
        assert!(required.contains(&serde_json::json!("table_name")));
    }
}
