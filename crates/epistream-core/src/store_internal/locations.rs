use rusqlite::{params, Connection};

use crate::error::PipelineResult;
use crate::model::TimeRange;
use crate::stats::{decode_breakdown, encode_breakdown, LocationStatRow};

/// Insert a batch inside one transaction. Returns rows actually inserted.
pub(crate) fn insert_rows_impl(conn: &Connection, rows: &[LocationStatRow]) -> PipelineResult<usize> {
    // Encode before opening the transaction so it only spans SQLite work.
    let blobs = rows
        .iter()
        .map(|r| encode_breakdown(&r.breakdown))
        .collect::<PipelineResult<Vec<_>>>()?;

    super::txn::immediate_impl(conn, |conn| insert_rows_inner(conn, rows, &blobs))
}

fn insert_rows_inner(
    conn: &Connection,
    rows: &[LocationStatRow],
    blobs: &[Vec<u8>],
) -> PipelineResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO location_stats
            (run_id, location_id, timestep, population, infected, breakdown)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut inserted = 0;
    for (row, blob) in rows.iter().zip(blobs) {
        inserted += stmt.execute(params![
            row.run_id,
            row.location_id,
            row.timestep as i64,
            row.population,
            row.infected,
            blob,
        ])?;
    }
    Ok(inserted)
}

pub(crate) fn rows_impl(
    conn: &Connection,
    run_id: i64,
    location_id: &str,
    range: &TimeRange,
) -> PipelineResult<Vec<LocationStatRow>> {
    let from = range.from.map(|t| t as i64).unwrap_or(0);
    let to = range.to.map(|t| t as i64).unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(
        "SELECT timestep, population, infected, breakdown FROM location_stats
         WHERE run_id = ?1 AND location_id = ?2 AND timestep BETWEEN ?3 AND ?4
         ORDER BY timestep",
    )?;
    let raw = stmt
        .query_map(params![run_id, location_id, from, to], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(timestep, population, infected, blob)| {
            Ok(LocationStatRow {
                run_id,
                location_id: location_id.to_string(),
                timestep: timestep as u64,
                population,
                infected,
                breakdown: decode_breakdown(&blob)?,
            })
        })
        .collect()
}

pub(crate) fn location_ids_impl(conn: &Connection, run_id: i64) -> PipelineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT location_id FROM location_stats WHERE run_id = ? ORDER BY location_id",
    )?;
    let ids = stmt
        .query_map([run_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub(crate) fn count_rows_impl(conn: &Connection, run_id: i64) -> PipelineResult<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM location_stats WHERE run_id = ?",
        [run_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

pub(crate) fn delete_rows_impl(conn: &Connection, run_id: i64) -> PipelineResult<usize> {
    Ok(conn.execute("DELETE FROM location_stats WHERE run_id = ?", [run_id])?)
}
