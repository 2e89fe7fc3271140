//! MCP server exposing the schema tools.
//!
//! The `#[mcp_server]` macro generates the protocol plumbing for every
//! `#[tool]` method below. Each method counts as an in-flight request until
//! it returns, so shutdown can drain it.

use crate::error::Result as ServerResult;
use crate::registry::SharedRegistry;
use crate::shutdown::SharedShutdownController;
use crate::tools::{
    self, DatabaseInput, DatabaseStatusInput, ListObjectsInput, NoInput, ObjectInput,
    ObjectSourceInput, RebuildInput, SchemaTools, SearchInput, TableInput, TablesInput,
    TypesInput,
};
use mcpkit::prelude::*;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

/// Schema cache server instance.
///
/// Cloned per request; the registry and shutdown controller are shared.
#[derive(Clone)]
pub struct SchemaServer {
    tools: SchemaTools,
    shutdown: SharedShutdownController,
}

impl SchemaServer {
    pub fn new(registry: SharedRegistry, shutdown: SharedShutdownController) -> Self {
        Self {
            tools: SchemaTools::new(registry),
            shutdown,
        }
    }

    pub fn tools(&self) -> &SchemaTools {
        &self.tools
    }

    /// Run one tool handler as a tracked request.
    async fn run<F>(&self, tool: &str, handler: F) -> Result<ToolOutput, McpError>
    where
        F: Future<Output = ServerResult<tools::ToolOutput>>,
    {
        let _request = self.shutdown.begin_request();
        let start = Instant::now();
        let output = tools::ToolOutput::from_result(handler.await);
        debug!(
            tool,
            is_error = output.is_error,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );

        Ok(if output.is_error {
            ToolOutput::error(output.text)
        } else {
            ToolOutput::text(output.text)
        })
    }
}

#[mcp_server(
    name = "schema-cache-server",
    version = "0.1.0",
    instructions = "Relational schema metadata: table profiles, search, constraints, indexes, relationships and stored objects, served from a per-database cache"
)]
impl SchemaServer {
    // =========================================================================
    // Registry Tools
    // =========================================================================

    #[tool(description = "List configured databases and their current state.")]
    pub async fn list_databases(&self, _input: NoInput) -> Result<ToolOutput, McpError> {
        self.run("list_databases", async { self.tools.list_databases() })
            .await
    }

    #[tool(description = "State, failure cause and cache figures for one or all databases.")]
    pub async fn get_database_status(
        &self,
        input: DatabaseStatusInput,
    ) -> Result<ToolOutput, McpError> {
        self.run("get_database_status", self.tools.get_database_status(input))
            .await
    }

    #[tool(description = "Vendor, version and schema of every configured database.")]
    pub async fn get_all_database_info(&self, _input: NoInput) -> Result<ToolOutput, McpError> {
        self.run("get_all_database_info", self.tools.get_all_database_info())
            .await
    }

    #[tool(description = "Vendor, version and active schema of one database.")]
    pub async fn get_database_vendor_info(
        &self,
        input: DatabaseInput,
    ) -> Result<ToolOutput, McpError> {
        self.run(
            "get_database_vendor_info",
            self.tools.get_database_vendor_info(input),
        )
        .await
    }

    // =========================================================================
    // Table Tools
    // =========================================================================

    #[tool(description = "Columns, relationships, constraints, indexes, statistics and comments of one table. Loads full detail on first use.")]
    pub async fn get_table_schema(&self, input: TableInput) -> Result<ToolOutput, McpError> {
        self.run("get_table_schema", self.tools.get_table_schema(input))
            .await
    }

    #[tool(description = "Batch version of get_table_schema for a short explicit list of tables (at most 50).")]
    pub async fn get_tables_schema(&self, input: TablesInput) -> Result<ToolOutput, McpError> {
        self.run("get_tables_schema", self.tools.get_tables_schema(input))
            .await
    }

    #[tool(description = "Find tables by name fragments (comma or space separated, any term matches) and show their schemas. Capped at 20 tables.")]
    pub async fn search_tables_schema(&self, input: SearchInput) -> Result<ToolOutput, McpError> {
        self.run("search_tables_schema", self.tools.search_tables_schema(input))
            .await
    }

    #[tool(description = "Find columns by name fragment across every table and list the tables holding them. Capped at 50 tables.")]
    pub async fn search_columns(&self, input: SearchInput) -> Result<ToolOutput, McpError> {
        self.run("search_columns", self.tools.search_columns(input))
            .await
    }

    #[tool(description = "List PRIMARY KEY, FOREIGN KEY, UNIQUE and CHECK constraints of a table.")]
    pub async fn get_table_constraints(&self, input: TableInput) -> Result<ToolOutput, McpError> {
        self.run("get_table_constraints", self.tools.get_table_constraints(input))
            .await
    }

    #[tool(description = "List indexes of a table with columns, uniqueness and status.")]
    pub async fn get_table_indexes(&self, input: TableInput) -> Result<ToolOutput, McpError> {
        self.run("get_table_indexes", self.tools.get_table_indexes(input))
            .await
    }

    #[tool(description = "Tables referenced by (outgoing) and referencing (incoming) a table through foreign keys.")]
    pub async fn get_related_tables(&self, input: TableInput) -> Result<ToolOutput, McpError> {
        self.run("get_related_tables", self.tools.get_related_tables(input))
            .await
    }

    // =========================================================================
    // Object Tools
    // =========================================================================

    #[tool(description = "List procedures, functions, packages, triggers or views, optionally filtered by a LIKE pattern.")]
    pub async fn list_objects(&self, input: ListObjectsInput) -> Result<ToolOutput, McpError> {
        self.run("list_objects", self.tools.list_objects(input))
            .await
    }

    #[tool(description = "Full source text of one stored object (procedure, function, package, trigger, view).")]
    pub async fn get_object_source(
        &self,
        input: ObjectSourceInput,
    ) -> Result<ToolOutput, McpError> {
        self.run("get_object_source", self.tools.get_object_source(input))
            .await
    }

    #[tool(description = "Views, stored code and triggers that depend on a table or object.")]
    pub async fn get_dependent_objects(&self, input: ObjectInput) -> Result<ToolOutput, McpError> {
        self.run("get_dependent_objects", self.tools.get_dependent_objects(input))
            .await
    }

    #[tool(description = "List user-defined types with the attributes of object types, optionally filtered by a LIKE pattern.")]
    pub async fn get_user_defined_types(&self, input: TypesInput) -> Result<ToolOutput, McpError> {
        self.run("get_user_defined_types", self.tools.get_user_defined_types(input))
            .await
    }

    // =========================================================================
    // Cache Tools
    // =========================================================================

    #[tool(description = "Rebuild the schema index after DDL changes. Expensive; invalidates cached detail.")]
    pub async fn rebuild_schema_cache(&self, input: RebuildInput) -> Result<ToolOutput, McpError> {
        self.run("rebuild_schema_cache", self.tools.rebuild_schema_cache(input))
            .await
    }

    #[tool(description = "Cache size, fully loaded entries and hit/miss/rebuild counters.")]
    pub async fn get_cache_stats(&self, input: DatabaseInput) -> Result<ToolOutput, McpError> {
        self.run("get_cache_stats", self.tools.get_cache_stats(input))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DatabaseRegistry;
    use crate::shutdown::{new_shutdown_controller, ShutdownConfig};
    use std::sync::Arc;

    fn server() -> (SchemaServer, SharedShutdownController) {
        let shutdown = new_shutdown_controller(ShutdownConfig::default());
        let server = SchemaServer::new(Arc::new(DatabaseRegistry::new()), shutdown.clone());
        (server, shutdown)
    }

    #[tokio::test]
    async fn test_tool_call_counts_as_in_flight() {
        let (server, shutdown) = server();
        let observed = shutdown.clone();

        let result = server
            .run("list_databases", async move {
                assert_eq!(observed.active_requests(), 1);
                Ok(tools::ToolOutput::text("ok"))
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(shutdown.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_tool_output() {
        let (server, shutdown) = server();
        let result = server
            .run("get_table_schema", server.tools().get_table_schema(TableInput {
                database_name: "hr".to_string(),
                table_name: "EMPLOYEES".to_string(),
            }))
            .await;

        assert!(result.is_ok());
        assert_eq!(shutdown.active_requests(), 0);
    }
}
