//! StatsStore: SQLite-backed chart documents and per-location rows.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{PipelineError, PipelineResult};
use crate::model::TimeRange;
use crate::stats::{ChartDocument, LocationStatRow};

#[path = "store_internal/mod.rs"]
mod store_internal;

pub use store_internal::charts::StoredChart;
pub use store_internal::schema::STATS_SCHEMA;

/// SQLite-backed statistics store. Clones share one connection.
#[derive(Clone)]
pub struct StatsStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for StatsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsStore").finish_non_exhaustive()
    }
}

impl StatsStore {
    /// Open a file-backed store, creating the parent directory.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> PipelineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> PipelineResult<Self> {
        store_internal::schema::init_connection_impl(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> PipelineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::store("stats store connection poisoned"))
    }

    /// Store (or replace) a run's chart document.
    pub fn put_chart(&self, run_id: i64, document: &ChartDocument) -> PipelineResult<()> {
        let conn = self.lock()?;
        store_internal::charts::put_chart_impl(&conn, run_id, document, Utc::now())
    }

    pub fn get_chart(&self, run_id: i64) -> PipelineResult<Option<StoredChart>> {
        let conn = self.lock()?;
        store_internal::charts::get_chart_impl(&conn, run_id)
    }

    pub fn delete_chart(&self, run_id: i64) -> PipelineResult<bool> {
        let conn = self.lock()?;
        store_internal::charts::delete_chart_impl(&conn, run_id)
    }

    /// Insert one batch of rows in a single transaction. Rows whose key
    /// already exists are ignored; returns how many were new.
    pub fn insert_location_rows(&self, rows: &[LocationStatRow]) -> PipelineResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        store_internal::locations::insert_rows_impl(&conn, rows)
    }

    /// Rows for one location within `range`, in timestep order.
    pub fn location_rows(
        &self,
        run_id: i64,
        location_id: &str,
        range: &TimeRange,
    ) -> PipelineResult<Vec<LocationStatRow>> {
        let conn = self.lock()?;
        store_internal::locations::rows_impl(&conn, run_id, location_id, range)
    }

    pub fn location_ids(&self, run_id: i64) -> PipelineResult<Vec<String>> {
        let conn = self.lock()?;
        store_internal::locations::location_ids_impl(&conn, run_id)
    }

    pub fn count_location_rows(&self, run_id: i64) -> PipelineResult<u64> {
        let conn = self.lock()?;
        store_internal::locations::count_rows_impl(&conn, run_id)
    }

    /// Drop a run's location rows ahead of re-ingestion.
    pub fn delete_location_rows(&self, run_id: i64) -> PipelineResult<usize> {
        let conn = self.lock()?;
        store_internal::locations::delete_rows_impl(&conn, run_id)
    }
}
