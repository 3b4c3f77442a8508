//! Monitoring points, observed properties, time series and their results.
//!
//! Points and properties come in two disjoint families (hydrological and
//! meteorological) with structurally identical records. The family is carried
//! as a value rather than as separate types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Family ──────────────────────────────────────────────────────────────────

/// The dataset family a monitoring point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFamily {
  Hydro,
  Meteo,
}

impl DatasetFamily {
  /// Order in which families are tried when resolving a national code.
  pub const RESOLUTION_ORDER: [DatasetFamily; 2] =
    [DatasetFamily::Hydro, DatasetFamily::Meteo];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Hydro => "hydro",
      Self::Meteo => "meteo",
    }
  }
}

impl fmt::Display for DatasetFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Points and properties ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringPoint {
  pub id:          i64,
  pub family:      DatasetFamily,
  /// International code (EUCD).
  pub eucd:        Option<String>,
  /// National code (NCD); the identifier used on the wire.
  pub ncd:         String,
  pub name:        String,
  pub operator_id: Option<i64>,
  pub is_active:   bool,
}

/// Input to the store's point provisioning.
#[derive(Debug, Clone)]
pub struct NewMonitoringPoint {
  pub family:      DatasetFamily,
  pub eucd:        Option<String>,
  pub ncd:         String,
  pub name:        String,
  pub operator_id: Option<i64>,
  pub is_active:   bool,
}

impl NewMonitoringPoint {
  /// An active point with no operator and no EUCD.
  pub fn new(family: DatasetFamily, ncd: impl Into<String>) -> Self {
    let ncd = ncd.into();
    Self {
      family,
      eucd: None,
      name: ncd.clone(),
      ncd,
      operator_id: None,
      is_active: true,
    }
  }
}

/// Whether a property carries raw real-time readings or processed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
  #[default]
  Realtime,
  Processed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedProperty {
  pub id:          i64,
  pub family:      DatasetFamily,
  /// Short key used on the wire (`PropertyId`).
  pub symbol:      String,
  pub description: String,
  pub unit:        String,
  pub kind:        PropertyKind,
}

#[derive(Debug, Clone)]
pub struct NewObservedProperty {
  pub symbol:      String,
  pub description: String,
  pub unit:        String,
  pub kind:        PropertyKind,
}

impl NewObservedProperty {
  pub fn new(symbol: impl Into<String>, unit: impl Into<String>) -> Self {
    let symbol = symbol.into();
    Self {
      description: symbol.clone(),
      symbol,
      unit: unit.into(),
      kind: PropertyKind::default(),
    }
  }
}

// ─── Time series ─────────────────────────────────────────────────────────────

/// One row per (point, property). Bounds and extremes are derived from the
/// stored results and refreshed after every upload touching the series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
  pub id:                    i64,
  pub family:                DatasetFamily,
  pub point_id:              i64,
  pub property_id:           i64,
  /// Last time an upload touched this series, whether or not it added rows.
  pub result_time:           DateTime<Utc>,
  pub phenomenon_time_begin: Option<DateTime<Utc>>,
  pub phenomenon_time_end:   Option<DateTime<Utc>>,
  pub min_value:             Option<f64>,
  pub min_value_time:        Option<DateTime<Utc>>,
  pub max_value:             Option<f64>,
  pub max_value_time:        Option<DateTime<Utc>>,
}

/// A stored result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub time_series_id: i64,
  pub time:           DateTime<Utc>,
  pub value:          f64,
  pub is_forecast:    bool,
  pub created_at:     DateTime<Utc>,
}

/// Filter for reading results back out of a series.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationRange {
  pub start: Option<DateTime<Utc>>,
  pub end:   Option<DateTime<Utc>>,
}

impl ObservationRange {
  pub fn contains(&self, time: DateTime<Utc>) -> bool {
    self.start.is_none_or(|s| time >= s) && self.end.is_none_or(|e| time <= e)
  }
}

/// `true` when `time` lies strictly after the ingestion instant.
pub fn is_forecast(time: DateTime<Utc>, now: DateTime<Utc>) -> bool { time > now }

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn forecast_flag_is_strictly_after_now() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
    let earlier = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
    assert!(is_forecast(later, now));
    assert!(!is_forecast(earlier, now));
    assert!(!is_forecast(now, now));
  }

  #[test]
  fn range_bounds_are_inclusive() {
    let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let b = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let range = ObservationRange { start: Some(a), end: Some(b) };
    assert!(range.contains(a));
    assert!(range.contains(b));
    assert!(!range.contains(b + chrono::Duration::seconds(1)));
    assert!(ObservationRange::default().contains(a));
  }
}
