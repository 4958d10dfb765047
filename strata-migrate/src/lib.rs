//! # strata-migrate
//!
//! Schema migration and seed-data reconciliation engine.
//!
//! Given declarative table descriptors and versioned seed ("default value")
//! records, the engine brings a live database into structural and data
//! conformance, safely and repeatably, inside a single transaction:
//!
//! - **Schema comparison** of live columns against descriptors, with
//!   dialect type spellings normalized to canonical tags
//! - **Whole-table rebuilds** (backup, drop, recreate, copy back, reset
//!   sequence) when a table differs from its descriptor
//! - **Constraint sync** dropping uniqueness constraints the model no longer
//!   declares
//! - **Seed reconciliation** keeping seed rows stable across runs through a
//!   persistent `(level, defaultValueId, tableName) -> recordId` mapping
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌────────────────┐
//! │ Descriptors  │────▶│ Table Migrator │────▶│ Constraint Sync│
//! └──────────────┘     └────────────────┘     └────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────┐     ┌────────────────┐     ┌────────────────┐
//! │ Seed levels  │────▶│ Seed Reconciler│────▶│ Mapping table  │
//! └──────────────┘     └────────────────┘     └────────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐
//!                      │ commit/rollback│
//!                      └────────────────┘
//! ```
//!
//! The engine talks to the database only through [`SchemaSession`]. The
//! `strata-postgres` crate implements it for PostgreSQL; [`memory`] provides
//! an in-memory implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_migrate::{Coordinator, MigrationConfig, Package, SeedSet, load_descriptors};
//!
//! async fn migrate(session: impl strata_migrate::TransactionalSession) -> strata_migrate::MigrateResult<()> {
//!     let package = Package::new("core")
//!         .descriptors(load_descriptors("core/models.json")?)
//!         .level(SeedSet::load("core", "core/default_values.json")?);
//!
//!     let report = Coordinator::new(MigrationConfig::new())
//!         .execute(&package, session)
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod compare;
pub mod constraints;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod mapping;
pub mod memory;
pub mod migrator;
pub mod model;
pub mod reconcile;
pub mod seed;
pub mod session;
pub mod types;

// Re-exports
pub use compare::{Comparison, Difference, LiveColumn, compare};
pub use constraints::{obsolete_constraints, sync_unique_constraints};
pub use coordinator::{Coordinator, MigrationConfig, Package, RunReport};
pub use descriptor::{
    CREATED_AT, FieldSpec, ForeignKey, IndexSpec, TableDescriptor, TableOptions, UPDATED_AT,
    load_descriptors, order_by_dependencies, parse_descriptors,
};
pub use error::{MigrateResult, MigrationError};
pub use mapping::{
    DEFAULT_VALUES_TABLE, MappingEntry, MappingKey, MappingRepository, SessionMappings,
    mapping_descriptor,
};
pub use memory::{FailPoint, MemoryDatabase, MemorySession};
pub use migrator::{BACKUP_SUFFIX, CopyFailurePolicy, TableMigrator, TableOutcome, TableReport};
pub use reconcile::{LevelReport, SeedReconciler, reset_sequences};
pub use seed::{SeedRecord, SeedSet};
pub use session::{Row, SchemaSession, TransactionalSession, UniqueConstraint};
pub use types::{ColumnType, NormalizedType, normalize_type};
