//! # Strata
//!
//! A schema migration engine for ScyllaDB and other Cassandra-wire
//! clusters. Strata discovers versioned CQL scripts, applies them in
//! order, records a durable audit ledger in a cluster-side history table,
//! and supports rollback.
//!
//! Migration files are named `{version}_{description}.{up|down}.{cql|sql}`:
//!
//! ```text
//! migrations/
//!   000001_create_users.up.cql
//!   000001_create_users.down.cql
//!   000002_add_index.up.cql
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(
//!     scylla::SessionBuilder::new()
//!         .known_node("localhost:9042")
//!         .build()
//!         .await?,
//! );
//!
//! let migrator = strata::Migrator::builder()
//!     .session(session)
//!     .dir("./migrations")?
//!     .keyspace("app")
//!     .build()?;
//!
//! // Apply everything that has not been applied yet.
//! let applied = migrator.up().await?;
//! println!("applied {applied} migrations");
//!
//! // Roll back the most recent one.
//! migrator.down().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Migrations can also be compiled into the binary by loading their
//! content (e.g. via `include_str!`) into an in-memory file tree:
//!
//! ```
//! # fn example() -> Result<(), strata::Error> {
//! let tree = strata::MemTree::new()
//!     .with_file("000001_create_users.up.cql", "CREATE TABLE users (id uuid PRIMARY KEY);");
//! # let _ = strata::FsSource::new(tree)?;
//! # Ok(())
//! # }
//! ```
//!
//! The engine never writes to its source, never closes the session it is
//! given, and records exactly one history row per successfully applied
//! migration.

#![deny(missing_docs)]

mod errors;
mod history;
mod migration;
mod migrator;
mod source;
mod statement;

pub mod keyspace;

pub use errors::{Error, KeyspaceError, MigrationError, ParseError, SourceError};
pub use migration::{
    is_migration_file, parse_migration, AppliedMigration, Direction, Migration, MigrationPair,
    Status,
};
pub use migrator::{Migrator, MigratorBuilder, DEFAULT_HISTORY_TABLE};
pub use source::{DirTree, FileTree, FsSource, MemTree, Source};
