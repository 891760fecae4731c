//! # Aurum Warehouse
//!
//! DuckDB-backed reconciliation store for aurum.
//!
//! ## Overview
//!
//! The warehouse keeps one row per `(entity_id, period_key)` and merges new
//! observations into it with last-write-wins semantics on the fetch time. It
//! answers the point lookups the reconciliation layer needs: latest row, the
//! nearest row at or before a period ordinal, and bounded history.
//!
//! ```rust,no_run
//! use aurum_warehouse::{ObservationRecord, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::in_memory())?;
//!     let record = ObservationRecord {
//!         entity_id: "reserve:CHN".to_string(),
//!         entity_class: "reserve".to_string(),
//!         code: "CHN".to_string(),
//!         market: "GLOBAL".to_string(),
//!         name: None,
//!         period_key: "2025-11".to_string(),
//!         period_ord: 2025 * 12 + 10,
//!         value: 2298.55,
//!         detail: "{}".to_string(),
//!         source: "imf".to_string(),
//!         fetched_at_ms: 1_764_547_200_000,
//!     };
//!     warehouse.upsert_observation(&record)?;
//!     assert!(warehouse.latest_observation("reserve:CHN")?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `entities` | Watchlist of registered entities |
//! | `observations` | One row per entity and period |
//! | `ingest_log` | Audit trail of store batches |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `v_latest_observations` | Latest row per entity |

pub mod duckdb;
mod entities;
pub mod migrations;
mod observations;
pub mod views;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::duckdb::Connection;
use thiserror::Error;

pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use entities::EntityRecord;
pub use observations::{IngestLogEntry, ObservationRecord, UpsertOutcome, UpsertReport};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Input was rejected before reaching the database.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A write kept conflicting with concurrent writers after all retries.
    #[error("write conflict on '{entity_id}' period '{period_key}' persisted after {attempts} attempts")]
    Conflict {
        entity_id: String,
        period_key: String,
        attempts: u32,
    },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file; `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    /// Maximum number of idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    pub fn file(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            max_pool_size: 4,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            max_pool_size: 4,
        }
    }
}

/// The reconciliation store.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
    write_stripes: Arc<observations::WriteStripes>,
}

impl Warehouse {
    /// Open a warehouse and bring its schema up to date.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self {
            manager,
            write_stripes: Arc::new(observations::WriteStripes::new()),
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema and views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    /// Path to the database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }

    /// Run trusted maintenance statements such as `CHECKPOINT`.
    pub fn execute_batch(&self, sql: &str) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch(sql)?;
        Ok(())
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            if let Err(error) = connection.execute_batch("COMMIT") {
                let _ = connection.execute_batch("ROLLBACK");
                return Err(error.into());
            }
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}
