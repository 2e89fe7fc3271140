//! Schema Cache Server entry point.
//!
//! Starts the MCP server on stdio. Every configured database is initialized
//! before the transport opens; databases that fail stay listed with their
//! cause and only the status tools answer for them.

use anyhow::{anyhow, Context, Result};
use mcpkit::prelude::*;
use mcpkit::transport::stdio::StdioTransport;
use schema_cache_server::registry::{DatabaseRegistry, Readiness};
use schema_cache_server::shutdown::{install_signal_handlers, new_shutdown_controller};
use schema_cache_server::{Config, SchemaServer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for JSON-RPC
    init_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Schema cache server starting");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        databases = ?config.declared,
        usable = ?config.database_names(),
        cache_dir = %config.cache.dir.display(),
        "Configuration loaded"
    );

    let shutdown = new_shutdown_controller(config.shutdown.clone());
    install_signal_handlers(shutdown.clone());

    let registry = Arc::new(DatabaseRegistry::from_config(&config)?);
    let report = registry.initialize_all().await;
    for outcome in &report.outcomes {
        match &outcome.cause {
            Some(cause) => warn!(database = %outcome.name, state = %outcome.state, "{}", cause),
            None => info!(database = %outcome.name, state = %outcome.state, "Database initialized"),
        }
    }
    match report.readiness {
        Readiness::Ready => info!("All databases ready"),
        Readiness::PartialSuccess => warn!("Some databases are unavailable"),
        Readiness::TotalFailure => error!("No database is usable; serving status tools only"),
    }

    let server = SchemaServer::new(registry.clone(), shutdown.clone());
    let service = ServerBuilder::new(server.clone())
        .with_tools(server)
        .build();

    info!("Serving on stdio");
    shutdown
        .run_until_shutdown(service.serve(StdioTransport::new()), &registry)
        .await
        .map_err(|e| anyhow!("MCP transport failed: {}", e))?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,schema_cache_server=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
