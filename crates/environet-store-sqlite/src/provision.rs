//! Provisioning and inspection methods on [`SqliteStore`].
//!
//! Reference data (operators, accounts, keys, points, properties) is managed
//! outside the upload pipeline. These methods are what an admin tool or a
//! test uses to set a node up, and to look at the rows an upload produced.

use chrono::Utc;
use environet_core::{
  identity::{Account, PublicKeyRecord},
  monitoring::{
    DatasetFamily, MonitoringPoint, NewMonitoringPoint, NewObservedProperty, Observation,
    ObservedProperty, TimeSeries,
  },
  signature::decode_public_key,
};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result, SqliteStore,
  encode::{
    RawAccount, RawObservation, RawPoint, RawProperty, RawPublicKey, RawTimeSeries, encode_dt,
    encode_property_kind,
  },
  family::tables,
};

impl SqliteStore {
  // ── Operators, accounts, groups ───────────────────────────────────────────

  /// Register an operator (the organisation owning points and accounts).
  pub async fn add_operator(&self, name: &str) -> Result<i64> {
    let name = name.to_owned();
    let at = encode_dt(Utc::now());
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO operators (name, created_at) VALUES (?1, ?2)",
          rusqlite::params![name, at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  pub async fn add_account(
    &self,
    username: &str,
    operator_id: Option<i64>,
    attributes: serde_json::Value,
  ) -> Result<Account> {
    let account = RawAccount {
      id: 0,
      username: username.to_owned(),
      operator_id,
      attributes: serde_json::to_string(&attributes)?,
      created_at: encode_dt(Utc::now()),
    };

    let id = self
      .conn
      .call({
        let (username, attributes, created_at) =
          (account.username.clone(), account.attributes.clone(), account.created_at.clone());
        move |conn| {
          conn.execute(
            "INSERT INTO users (username, operator_id, attributes, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![username, operator_id, attributes, created_at],
          )?;
          Ok(conn.last_insert_rowid())
        }
      })
      .await?;

    RawAccount { id, ..account }.into_account()
  }

  pub async fn add_group(&self, name: &str) -> Result<i64> {
    let name = name.to_owned();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute("INSERT INTO groups (name) VALUES (?1)", rusqlite::params![name])?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  pub async fn add_account_to_group(&self, account_id: i64, group_id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
          rusqlite::params![account_id, group_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Grant a permission directly to an account. Granting twice is a no-op.
  pub async fn grant_account_permission(&self, account_id: i64, permission: &str) -> Result<()> {
    let permission = permission.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO user_permissions (user_id, permission) VALUES (?1, ?2)",
          rusqlite::params![account_id, permission],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Grant a permission to every member of a group.
  pub async fn grant_group_permission(&self, group_id: i64, permission: &str) -> Result<()> {
    let permission = permission.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO group_permissions (group_id, permission) VALUES (?1, ?2)",
          rusqlite::params![group_id, permission],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Keys ──────────────────────────────────────────────────────────────────

  /// Register `public_key_pem` as the account's current key.
  ///
  /// Every previously active key of the account is revoked in the same
  /// transaction, so exactly one key verifies from the next request on.
  pub async fn register_public_key(
    &self,
    account_id: i64,
    public_key_pem: &str,
  ) -> Result<PublicKeyRecord> {
    decode_public_key(public_key_pem)?;

    let pem = public_key_pem.trim().to_owned();
    let at = encode_dt(Utc::now());

    let raw: Option<RawPublicKey> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row("SELECT 1 FROM users WHERE id = ?1", rusqlite::params![account_id], |_| {
            Ok(())
          })
          .optional()?
          .is_some();
        if !exists {
          return Ok(None);
        }
        tx.execute(
          "UPDATE public_keys SET revoked = 1, revoked_at = ?2 WHERE user_id = ?1 AND revoked = 0",
          rusqlite::params![account_id, at],
        )?;
        tx.execute(
          "INSERT INTO public_keys (user_id, public_key, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![account_id, pem, at],
        )?;
        let id = tx.last_insert_rowid();
        let raw = tx.query_row(
          &format!("SELECT {} FROM public_keys WHERE id = ?1", RawPublicKey::COLUMNS),
          rusqlite::params![id],
          RawPublicKey::from_row,
        )?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw.ok_or(Error::AccountNotFound(account_id))?.into_record()
  }

  /// Every key ever registered for an account, oldest first.
  pub async fn public_keys(&self, account_id: i64) -> Result<Vec<PublicKeyRecord>> {
    let raws: Vec<RawPublicKey> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM public_keys WHERE user_id = ?1 ORDER BY id",
          RawPublicKey::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![account_id], RawPublicKey::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPublicKey::into_record).collect()
  }

  // ── Points and properties ─────────────────────────────────────────────────

  pub async fn add_monitoring_point(&self, input: NewMonitoringPoint) -> Result<MonitoringPoint> {
    let t = tables(input.family);
    let family = input.family;

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {} (eucd, ncd, name, operator_id, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
            t.points
          ),
          rusqlite::params![input.eucd, input.ncd, input.name, input.operator_id, input.is_active],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {} FROM {} WHERE id = ?1", RawPoint::COLUMNS, t.points),
          rusqlite::params![id],
          |row| RawPoint::from_row(family, row),
        )?)
      })
      .await?;

    Ok(raw.into_point())
  }

  pub async fn add_observed_property(
    &self,
    family: DatasetFamily,
    input: NewObservedProperty,
  ) -> Result<ObservedProperty> {
    let t = tables(family);
    let kind = encode_property_kind(input.kind);

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {} (symbol, description, unit, kind) VALUES (?1, ?2, ?3, ?4)",
            t.properties
          ),
          rusqlite::params![input.symbol, input.description, input.unit, kind],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!(
            "SELECT id, symbol, description, unit, kind FROM {} WHERE id = ?1",
            t.properties
          ),
          rusqlite::params![id],
          |row| RawProperty::from_row(family, row),
        )?)
      })
      .await?;

    raw.into_property()
  }

  /// Allow `property_id` to be reported for `point_id`. Linking twice is a
  /// no-op.
  pub async fn link_property(
    &self,
    family: DatasetFamily,
    point_id: i64,
    property_id: i64,
  ) -> Result<()> {
    let t = tables(family);

    let (point_exists, property_exists) = self
      .conn
      .call(move |conn| {
        let exists = |sql: String, id: i64| -> rusqlite::Result<bool> {
          Ok(conn.query_row(&sql, rusqlite::params![id], |_| Ok(())).optional()?.is_some())
        };
        let point = exists(format!("SELECT 1 FROM {} WHERE id = ?1", t.points), point_id)?;
        let property =
          exists(format!("SELECT 1 FROM {} WHERE id = ?1", t.properties), property_id)?;
        if point && property {
          conn.execute(
            &format!(
              "INSERT OR IGNORE INTO {} ({}, observed_property_id) VALUES (?1, ?2)",
              t.point_properties, t.point_fk
            ),
            rusqlite::params![point_id, property_id],
          )?;
        }
        Ok((point, property))
      })
      .await?;

    if !point_exists {
      return Err(Error::PointNotFound { family, id: point_id });
    }
    if !property_exists {
      return Err(Error::PropertyNotFound { family, id: property_id });
    }
    Ok(())
  }

  // ── Inspection ────────────────────────────────────────────────────────────

  /// The series of (point, property), if any upload created it.
  pub async fn time_series(
    &self,
    family: DatasetFamily,
    point_id: i64,
    property_id: i64,
  ) -> Result<Option<TimeSeries>> {
    let t = tables(family);

    let raw: Option<RawTimeSeries> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT id, {fk}, observed_property_id, result_time,
                        phenomenon_time_begin, phenomenon_time_end,
                        min_value, min_value_time, max_value, max_value_time
                 FROM {ts} WHERE {fk} = ?1 AND observed_property_id = ?2",
                fk = t.point_fk,
                ts = t.time_series,
              ),
              rusqlite::params![point_id, property_id],
              |row| RawTimeSeries::from_row(family, row),
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTimeSeries::into_time_series).transpose()
  }

  /// Every stored result row of a series, superseded values included,
  /// ordered by time then insertion.
  pub async fn results(
    &self,
    family: DatasetFamily,
    time_series_id: i64,
  ) -> Result<Vec<Observation>> {
    let t = tables(family);

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT time_series_id, time, value, is_forecast, created_at
           FROM {} WHERE time_series_id = ?1 ORDER BY time, id",
          t.results
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![time_series_id], RawObservation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  /// Total result rows of a family, across every series.
  pub async fn result_count(&self, family: DatasetFamily) -> Result<usize> {
    let t = tables(family);
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", t.results), [], |r| r.get(0))?)
      })
      .await?;
    Ok(usize::try_from(count).unwrap_or_default())
  }
}
