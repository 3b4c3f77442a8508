//! The ingestion transaction: resolve, upsert series, insert results, refresh
//! statistics.
//!
//! Everything here runs on one connection inside one transaction owned by
//! [`crate::SqliteStore::apply_upload`]. A [`Rejection`] is returned as a
//! value rather than an error so the caller decides to roll back.

use chrono::{DateTime, Utc};
use environet_core::{
  monitoring::is_forecast,
  upload::{DataPoint, IngestError, SeriesOutcome, UploadData, UploadOutcome},
};
use rusqlite::{Connection, ErrorCode, OptionalExtension as _, types::Value};

use crate::{
  encode::encode_dt,
  family::{FamilyTables, tables},
  resolve::{find_point, find_point_property},
};

/// Number of result rows written per multi-row `INSERT`.
pub const RESULT_CHUNK: usize = 3000;

/// Why an upload was refused before anything became visible.
#[derive(Debug)]
pub(crate) enum Rejection {
  UnknownPoint,
  PropertyNotAllowed(String),
  SeriesCreation(String),
}

impl Rejection {
  pub(crate) fn into_ingest_error<E>(self, point: String) -> IngestError<E> {
    match self {
      Self::UnknownPoint => IngestError::UnknownMonitoringPoint(point),
      Self::PropertyNotAllowed(symbol) => IngestError::PropertyNotAllowedForPoint { point, symbol },
      Self::SeriesCreation(symbol) => IngestError::TimeSeriesCreationFailed { point, symbol },
    }
  }
}

/// Apply every property block of `upload` in document order.
///
/// The first block that cannot be resolved stops the run; rows written for
/// earlier blocks are only discarded once the caller drops the transaction.
pub(crate) fn apply(
  conn: &Connection,
  upload: &UploadData,
  now: DateTime<Utc>,
) -> rusqlite::Result<Result<UploadOutcome, Rejection>> {
  let Some(point) = find_point(conn, &upload.monitoring_point_id)? else {
    return Ok(Err(Rejection::UnknownPoint));
  };
  let t = tables(point.family);
  let stamp = encode_dt(now);

  let mut series = Vec::with_capacity(upload.properties.len());
  for block in &upload.properties {
    let Some(property) = find_point_property(conn, point.family, point.id, &block.symbol)? else {
      return Ok(Err(Rejection::PropertyNotAllowed(block.symbol.clone())));
    };
    let Some((time_series_id, created)) = upsert_time_series(conn, t, point.id, property.id, &stamp)?
    else {
      return Ok(Err(Rejection::SeriesCreation(block.symbol.clone())));
    };
    let inserted = insert_results(conn, t, time_series_id, &block.points, now)?;

    series.push(SeriesOutcome {
      symbol: block.symbol.clone(),
      property_id: property.id,
      time_series_id,
      created,
      received: block.points.len(),
      inserted,
    });
  }

  let mut touched: Vec<i64> = series.iter().map(|s| s.time_series_id).collect();
  touched.sort_unstable();
  touched.dedup();
  for id in touched {
    refresh_statistics(conn, t, id)?;
  }

  Ok(Ok(UploadOutcome { family: point.family, point_id: point.id, series }))
}

// ─── Series ──────────────────────────────────────────────────────────────────

/// Look up or create the series of (point, property) and stamp its
/// `result_time` with `stamp` either way.
///
/// Returns the series id and whether this call created it, or `None` when no
/// row could be produced.
pub(crate) fn upsert_time_series(
  conn: &Connection,
  t: &FamilyTables,
  point_id: i64,
  property_id: i64,
  stamp: &str,
) -> rusqlite::Result<Option<(i64, bool)>> {
  let existing: Option<i64> = conn
    .query_row(
      &format!(
        "SELECT id FROM {} WHERE {} = ?1 AND observed_property_id = ?2",
        t.time_series, t.point_fk
      ),
      rusqlite::params![point_id, property_id],
      |r| r.get(0),
    )
    .optional()?;

  let upserted = conn.query_row(
    &format!(
      "INSERT INTO {ts} ({fk}, observed_property_id, result_time) VALUES (?1, ?2, ?3)
       ON CONFLICT ({fk}, observed_property_id) DO UPDATE SET result_time = excluded.result_time
       RETURNING id",
      ts = t.time_series,
      fk = t.point_fk,
    ),
    rusqlite::params![point_id, property_id, stamp],
    |r| r.get::<_, i64>(0),
  );

  match upserted {
    Ok(id) => Ok(Some((id, existing.is_none()))),
    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
    Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
      Ok(None)
    }
    Err(e) => Err(e),
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Insert `points` in document order, [`RESULT_CHUNK`] rows per statement.
/// Rows equal to a stored one on (series, time, value, forecast flag) are
/// skipped. Returns the number of rows actually written.
pub(crate) fn insert_results(
  conn: &Connection,
  t: &FamilyTables,
  time_series_id: i64,
  points: &[DataPoint],
  now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
  let created_at = encode_dt(now);
  let mut inserted = 0;

  for chunk in points.chunks(RESULT_CHUNK) {
    let rows = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
    let sql = format!(
      "INSERT INTO {} (time_series_id, time, value, is_forecast, created_at) VALUES {rows}
       ON CONFLICT (time_series_id, time, value, is_forecast) DO NOTHING",
      t.results
    );

    let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * 5);
    for point in chunk {
      params.push(Value::Integer(time_series_id));
      params.push(Value::Text(encode_dt(point.time)));
      params.push(Value::Real(point.value));
      params.push(Value::Integer(i64::from(is_forecast(point.time, now))));
      params.push(Value::Text(created_at.clone()));
    }

    inserted += conn.execute(&sql, rusqlite::params_from_iter(params))?;
  }

  Ok(inserted)
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Recompute bounds and extremes of a series from its stored results. Ties
/// on the extreme value resolve to the earliest time.
pub(crate) fn refresh_statistics(
  conn: &Connection,
  t: &FamilyTables,
  time_series_id: i64,
) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "UPDATE {ts} SET
         phenomenon_time_begin = (SELECT MIN(time) FROM {r} WHERE time_series_id = ?1),
         phenomenon_time_end   = (SELECT MAX(time) FROM {r} WHERE time_series_id = ?1),
         min_value      = (SELECT MIN(value) FROM {r} WHERE time_series_id = ?1),
         min_value_time = (SELECT time FROM {r} WHERE time_series_id = ?1
                           ORDER BY value ASC, time ASC LIMIT 1),
         max_value      = (SELECT MAX(value) FROM {r} WHERE time_series_id = ?1),
         max_value_time = (SELECT time FROM {r} WHERE time_series_id = ?1
                           ORDER BY value DESC, time ASC LIMIT 1)
       WHERE id = ?1",
      ts = t.time_series,
      r = t.results,
    ),
    rusqlite::params![time_series_id],
  )?;
  Ok(())
}
