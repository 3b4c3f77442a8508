//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed nanosecond
//! precision (chrono's full resolution), so two encodings of the same instant are byte-identical and
//! text ordering matches time ordering. Both properties are relied on by the
//! results uniqueness constraint and the range queries.

use chrono::{DateTime, SecondsFormat, Utc};
use environet_core::{
  identity::{Account, PublicKeyRecord},
  monitoring::{
    DatasetFamily, MonitoringPoint, Observation, ObservedProperty, PropertyKind, TimeSeries,
  },
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Nanos, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── PropertyKind ────────────────────────────────────────────────────────────

pub fn encode_property_kind(k: PropertyKind) -> &'static str {
  match k {
    PropertyKind::Realtime => "realtime",
    PropertyKind::Processed => "processed",
  }
}

pub fn decode_property_kind(s: &str) -> Result<PropertyKind> {
  match s {
    "realtime" => Ok(PropertyKind::Realtime),
    "processed" => Ok(PropertyKind::Processed),
    other => Err(Error::Decode(format!("unknown property kind: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `users` row.
pub struct RawAccount {
  pub id:          i64,
  pub username:    String,
  pub operator_id: Option<i64>,
  pub attributes:  String,
  pub created_at:  String,
}

impl RawAccount {
  pub const COLUMNS: &'static str = "id, username, operator_id, attributes, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      username:    row.get(1)?,
      operator_id: row.get(2)?,
      attributes:  row.get(3)?,
      created_at:  row.get(4)?,
    })
  }

  pub fn into_account(self) -> Result<Account> {
    Ok(Account {
      id:          self.id,
      username:    self.username,
      operator_id: self.operator_id,
      attributes:  serde_json::from_str(&self.attributes)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `public_keys` row.
pub struct RawPublicKey {
  pub id:         i64,
  pub account_id: i64,
  pub public_key: String,
  pub revoked:    bool,
  pub revoked_at: Option<String>,
  pub created_at: String,
}

impl RawPublicKey {
  pub const COLUMNS: &'static str = "id, user_id, public_key, revoked, revoked_at, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      account_id: row.get(1)?,
      public_key: row.get(2)?,
      revoked:    row.get(3)?,
      revoked_at: row.get(4)?,
      created_at: row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<PublicKeyRecord> {
    Ok(PublicKeyRecord {
      id:         self.id,
      account_id: self.account_id,
      public_key: self.public_key,
      revoked:    self.revoked,
      revoked_at: decode_opt_dt(self.revoked_at)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a family point row.
pub struct RawPoint {
  pub family:      DatasetFamily,
  pub id:          i64,
  pub eucd:        Option<String>,
  pub ncd:         String,
  pub name:        String,
  pub operator_id: Option<i64>,
  pub is_active:   bool,
}

impl RawPoint {
  pub const COLUMNS: &'static str = "id, eucd, ncd, name, operator_id, is_active";

  pub fn from_row(family: DatasetFamily, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      family,
      id: row.get(0)?,
      eucd: row.get(1)?,
      ncd: row.get(2)?,
      name: row.get(3)?,
      operator_id: row.get(4)?,
      is_active: row.get(5)?,
    })
  }

  pub fn into_point(self) -> MonitoringPoint {
    MonitoringPoint {
      id:          self.id,
      family:      self.family,
      eucd:        self.eucd,
      ncd:         self.ncd,
      name:        self.name,
      operator_id: self.operator_id,
      is_active:   self.is_active,
    }
  }
}

/// Raw values read directly from a family property row.
pub struct RawProperty {
  pub family:      DatasetFamily,
  pub id:          i64,
  pub symbol:      String,
  pub description: String,
  pub unit:        String,
  pub kind:        String,
}

impl RawProperty {
  pub fn from_row(family: DatasetFamily, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      family,
      id: row.get(0)?,
      symbol: row.get(1)?,
      description: row.get(2)?,
      unit: row.get(3)?,
      kind: row.get(4)?,
    })
  }

  pub fn into_property(self) -> Result<ObservedProperty> {
    Ok(ObservedProperty {
      id:          self.id,
      family:      self.family,
      symbol:      self.symbol,
      description: self.description,
      unit:        self.unit,
      kind:        decode_property_kind(&self.kind)?,
    })
  }
}

/// Raw values read directly from a family time-series row.
pub struct RawTimeSeries {
  pub family:                DatasetFamily,
  pub id:                    i64,
  pub point_id:              i64,
  pub property_id:           i64,
  pub result_time:           String,
  pub phenomenon_time_begin: Option<String>,
  pub phenomenon_time_end:   Option<String>,
  pub min_value:             Option<f64>,
  pub min_value_time:        Option<String>,
  pub max_value:             Option<f64>,
  pub max_value_time:        Option<String>,
}

impl RawTimeSeries {
  pub fn from_row(family: DatasetFamily, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      family,
      id: row.get(0)?,
      point_id: row.get(1)?,
      property_id: row.get(2)?,
      result_time: row.get(3)?,
      phenomenon_time_begin: row.get(4)?,
      phenomenon_time_end: row.get(5)?,
      min_value: row.get(6)?,
      min_value_time: row.get(7)?,
      max_value: row.get(8)?,
      max_value_time: row.get(9)?,
    })
  }

  pub fn into_time_series(self) -> Result<TimeSeries> {
    Ok(TimeSeries {
      id:                    self.id,
      family:                self.family,
      point_id:              self.point_id,
      property_id:           self.property_id,
      result_time:           decode_dt(&self.result_time)?,
      phenomenon_time_begin: decode_opt_dt(self.phenomenon_time_begin)?,
      phenomenon_time_end:   decode_opt_dt(self.phenomenon_time_end)?,
      min_value:             self.min_value,
      min_value_time:        decode_opt_dt(self.min_value_time)?,
      max_value:             self.max_value,
      max_value_time:        decode_opt_dt(self.max_value_time)?,
    })
  }
}

/// Raw values read directly from a family result row.
pub struct RawObservation {
  pub time_series_id: i64,
  pub time:           String,
  pub value:          f64,
  pub is_forecast:    bool,
  pub created_at:     String,
}

impl RawObservation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      time_series_id: row.get(0)?,
      time:           row.get(1)?,
      value:          row.get(2)?,
      is_forecast:    row.get(3)?,
      created_at:     row.get(4)?,
    })
  }

  pub fn into_observation(self) -> Result<Observation> {
    Ok(Observation {
      time_series_id: self.time_series_id,
      time:           decode_dt(&self.time)?,
      value:          self.value,
      is_forecast:    self.is_forecast,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{FixedOffset, TimeZone};

  use super::*;

  #[test]
  fn encoded_instants_are_canonical() {
    let utc = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let shifted = FixedOffset::east_opt(2 * 3600)
      .unwrap()
      .with_ymd_and_hms(2024, 1, 1, 2, 0, 0)
      .unwrap()
      .with_timezone(&Utc);
    assert_eq!(encode_dt(utc), "2024-01-01T00:00:00.000000000Z");
    assert_eq!(encode_dt(utc), encode_dt(shifted));
    assert_eq!(decode_dt(&encode_dt(utc)).unwrap(), utc);
  }

  #[test]
  fn sub_microsecond_instants_stay_distinct() {
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let later = t + chrono::Duration::nanoseconds(1);
    assert_eq!(encode_dt(later), "2024-01-01T00:00:00.000000001Z");
    assert!(encode_dt(t) < encode_dt(later));
    assert_eq!(decode_dt(&encode_dt(later)).unwrap(), later);
  }

  #[test]
  fn unknown_property_kind_is_a_decode_error() {
    assert!(matches!(decode_property_kind("hourly"), Err(Error::Decode(_))));
  }
}
