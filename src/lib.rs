//! # Strata
//!
//! Schema migration and seed-data reconciliation driven by declarative
//! table descriptors.
//!
//! Strata provides:
//! - Table rebuilds that preserve existing rows when a declared shape drifts
//! - Seed levels whose records keep a stable logical identity across runs
//! - One transaction per package, committed only when every step succeeds
//! - A PostgreSQL backend and an in-memory backend for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let package = Package::new("core")
//!         .descriptors(load_descriptors("core/tables.json")?)
//!         .level(SeedSet::load("core", "core/seeds.json")?);
//!
//!     let pool = PgPool::builder().url("postgresql://localhost/app").build()?;
//!     let mut conn = pool.get().await?;
//!     let session = PgSession::new(conn.transaction().await?);
//!
//!     let report = Coordinator::new(MigrationConfig::default())
//!         .execute(&package, session)
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Migration engine: descriptors, comparator, migrator, seed reconciler.
pub mod migrate {
    pub use strata_migrate::*;
}

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use strata_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use strata_migrate::{
        Coordinator, CopyFailurePolicy, MappingKey, MappingRepository, MemoryDatabase,
        MigrateResult, MigrationConfig, MigrationError, Package, RunReport, SeedSet,
        SessionMappings, TableDescriptor, load_descriptors,
    };

    #[cfg(feature = "postgres")]
    pub use strata_postgres::{PgConfig, PgPool, PgSession};
}

// Re-export key types at the crate root
pub use strata_migrate::{
    Coordinator, MigrateResult, MigrationConfig, MigrationError, Package, RunReport,
};
