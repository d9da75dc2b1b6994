//! SQLite schema for the statistics store.
//!
//! Tables:
//! - `chart_documents`: one generated chart document per run
//! - `location_stats`: append-only per-location rows, idempotent on the key

use rusqlite::Connection;

use crate::error::PipelineResult;

/// DDL for the statistics tables.
///
/// Schema version: 1
pub const STATS_SCHEMA: &str = r#"
-- Chart documents (replaced wholesale on regeneration)
CREATE TABLE IF NOT EXISTS chart_documents (
    run_id        INTEGER PRIMARY KEY,
    document      TEXT NOT NULL,
    generated_at  TEXT NOT NULL
);

-- Per-location rows (bulk-inserted, INSERT OR IGNORE)
CREATE TABLE IF NOT EXISTS location_stats (
    run_id        INTEGER NOT NULL,
    location_id   TEXT NOT NULL,
    timestep      INTEGER NOT NULL,
    population    INTEGER NOT NULL,
    infected      INTEGER NOT NULL,
    breakdown     BLOB NOT NULL,
    PRIMARY KEY (run_id, location_id, timestep)
);

CREATE INDEX IF NOT EXISTS idx_location_stats_run ON location_stats(run_id);
"#;

pub(crate) fn init_connection_impl(conn: &Connection) -> PipelineResult<()> {
    // WAL mode for file-backed DBs (no-op for in-memory)
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL");
    let _ = conn.execute_batch("PRAGMA busy_timeout = 5000");
    conn.execute_batch(STATS_SCHEMA)?;
    Ok(())
}
