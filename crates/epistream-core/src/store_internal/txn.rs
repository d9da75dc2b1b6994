use rusqlite::Connection;

use crate::error::PipelineResult;

/// Run `f` inside `BEGIN IMMEDIATE`. Any failure, including a failed
/// `COMMIT`, leaves the connection back in autocommit mode.
pub(crate) fn immediate_impl<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> PipelineResult<T>,
) -> PipelineResult<T> {
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = f(conn).and_then(|value| {
        conn.execute("COMMIT", [])?;
        Ok(value)
    });

    if result.is_err() && !conn.is_autocommit() {
        let _ = conn.execute("ROLLBACK", []);
    }
    result
}
