//! [`SqliteStore`], the SQLite implementation of [`DistributionStore`].

use std::{collections::BTreeSet, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use environet_core::{
  identity::{Account, PublicKeyRecord},
  monitoring::{DatasetFamily, MonitoringPoint, Observation, ObservationRange, ObservedProperty},
  store::DistributionStore,
  upload::{IngestError, UploadData, UploadOutcome},
};

use crate::{
  Error, Result,
  encode::{RawAccount, RawObservation, RawPublicKey, encode_dt},
  family::{HYDRO, METEO, tables},
  resolve::{find_point, find_point_property},
  schema::{SCHEMA, family_schema},
  upsert,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Environet distribution-node store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&family_schema(&HYDRO))?;
        conn.execute_batch(&family_schema(&METEO))?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── DistributionStore impl ──────────────────────────────────────────────────

impl DistributionStore for SqliteStore {
  type Error = Error;

  // ── Identities ────────────────────────────────────────────────────────────

  async fn find_account(&self, username: &str) -> Result<Option<Account>> {
    let username = username.to_owned();

    let raw: Option<RawAccount> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM users WHERE username = ?1", RawAccount::COLUMNS),
              rusqlite::params![username],
              RawAccount::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccount::into_account).transpose()
  }

  async fn current_public_key(&self, account_id: i64) -> Result<Option<PublicKeyRecord>> {
    let raw: Option<RawPublicKey> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM public_keys
                 WHERE user_id = ?1 AND revoked = 0
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                RawPublicKey::COLUMNS
              ),
              rusqlite::params![account_id],
              RawPublicKey::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPublicKey::into_record).transpose()
  }

  async fn permissions_for(&self, account_id: i64) -> Result<BTreeSet<String>> {
    let permissions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT permission FROM user_permissions WHERE user_id = ?1
           UNION
           SELECT gp.permission FROM group_permissions gp
           JOIN user_groups ug ON ug.group_id = gp.group_id
           WHERE ug.user_id = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![account_id], |r| r.get::<_, String>(0))?
          .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(permissions)
  }

  // ── Monitoring points ─────────────────────────────────────────────────────

  async fn find_monitoring_point(&self, ncd: &str) -> Result<Option<MonitoringPoint>> {
    let ncd = ncd.to_owned();
    let raw = self
      .conn
      .call(move |conn| Ok(find_point(conn, &ncd)?))
      .await?;
    Ok(raw.map(|p| p.into_point()))
  }

  async fn find_point_property(
    &self,
    family: DatasetFamily,
    point_id: i64,
    symbol: &str,
  ) -> Result<Option<ObservedProperty>> {
    let symbol = symbol.to_owned();
    let raw = self
      .conn
      .call(move |conn| Ok(find_point_property(conn, family, point_id, &symbol)?))
      .await?;
    raw.map(|p| p.into_property()).transpose()
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  async fn apply_upload(
    &self,
    upload: UploadData,
    now: DateTime<Utc>,
  ) -> Result<UploadOutcome, IngestError<Error>> {
    let point = upload.monitoring_point_id.clone();

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let applied = upsert::apply(&tx, &upload, now)?;
        // A rejected upload drops `tx`, which rolls it back.
        if applied.is_ok() {
          tx.commit()?;
        }
        Ok(applied)
      })
      .await
      .map_err(|e| IngestError::Store(Error::from(e)))?;

    applied.map_err(|rejection| rejection.into_ingest_error(point))
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn latest_observations(
    &self,
    family: DatasetFamily,
    point_id: i64,
    property_id: i64,
    range: ObservationRange,
  ) -> Result<Vec<Observation>> {
    let t = tables(family);
    let start = range.start.map(encode_dt);
    let end = range.end.map(encode_dt);

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT r.time_series_id, r.time, r.value, r.is_forecast, r.created_at
           FROM {r} r
           JOIN {ts} s ON s.id = r.time_series_id
           WHERE s.{fk} = ?1 AND s.observed_property_id = ?2
             AND (?3 IS NULL OR r.time >= ?3)
             AND (?4 IS NULL OR r.time <= ?4)
             AND r.id = (
               SELECT r2.id FROM {r} r2
               WHERE r2.time_series_id = r.time_series_id AND r2.time = r.time
               ORDER BY r2.created_at DESC, r2.id DESC
               LIMIT 1
             )
           ORDER BY r.time",
          r = t.results,
          ts = t.time_series,
          fk = t.point_fk,
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![point_id, property_id, start, end], RawObservation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }
}
