use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PipelineError, PipelineResult};
use crate::stats::ChartDocument;

/// A chart document with its generation time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChart {
    pub document: ChartDocument,
    pub generated_at: DateTime<Utc>,
}

pub(crate) fn put_chart_impl(
    conn: &Connection,
    run_id: i64,
    document: &ChartDocument,
    generated_at: DateTime<Utc>,
) -> PipelineResult<()> {
    let json = serde_json::to_string(document)?;
    conn.execute(
        "INSERT INTO chart_documents(run_id, document, generated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(run_id) DO UPDATE SET document = excluded.document,
                                           generated_at = excluded.generated_at",
        params![run_id, json, generated_at.to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn get_chart_impl(conn: &Connection, run_id: i64) -> PipelineResult<Option<StoredChart>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT document, generated_at FROM chart_documents WHERE run_id = ?",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((json, generated_at)) = row else {
        return Ok(None);
    };
    let document = serde_json::from_str(&json)
        .map_err(|e| PipelineError::store(format!("corrupt chart document for run {}: {}", run_id, e)))?;
    let generated_at = DateTime::parse_from_rfc3339(&generated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::store(format!("invalid generated_at: {}", e)))?;
    Ok(Some(StoredChart {
        document,
        generated_at,
    }))
}

pub(crate) fn delete_chart_impl(conn: &Connection, run_id: i64) -> PipelineResult<bool> {
    let n = conn.execute("DELETE FROM chart_documents WHERE run_id = ?", [run_id])?;
    Ok(n > 0)
}
