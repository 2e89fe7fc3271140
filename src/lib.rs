//! # Schema Cache Server
//!
//! Caching and indexing engine for relational database schema metadata,
//! serving table profiles to calling agents without re-querying the
//! database's data dictionary on every request.
//!
//! This crate provides:
//! - **Schema cache**: A per-database table index, promoted to full detail on
//!   first use and persisted to disk between runs
//! - **Metadata sources**: The introspection seam, with a JSON snapshot adapter
//!   and a retrying decorator
//! - **Registry**: Multi-database routing with per-database health states
//! - **Tools**: Typed, text-returning tool calls over the registry
//! - **Server**: The MCP tool surface, served over stdio
//!
//! ## Architecture
//!
//! Each configured database owns one [`schema::SchemaManager`]. Lookups take
//! a shared lock on the cache; promotions fetch detail without holding it and
//! coalesce per table; rebuilds take the exclusive lock and win over any
//! promotion still in flight.

pub mod config;
pub mod constants;
pub mod error;
pub mod registry;
pub mod schema;
pub mod server;
pub mod shutdown;
pub mod source;
pub mod tools;

pub use config::Config;
pub use error::{Result, ServerError};
pub use registry::{DatabaseRegistry, DatabaseState, SharedRegistry};
pub use schema::{SchemaCache, SchemaManager, TableInfo};
pub use server::SchemaServer;
pub use source::{MetadataSource, SharedSource};
pub use tools::SchemaTools;
