//! The upload document and the outcome of applying it.
//!
//! [`UploadData`] is what the schema validator produces from a request body
//! and what producers (the data-node CLI, tests) hand to the XML builder. The
//! store turns it into time-series rows and reports an [`UploadOutcome`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Error, Result, monitoring::DatasetFamily};

// ─── Document ────────────────────────────────────────────────────────────────

/// One `Point` of a `TimeSeries`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
  pub time:  DateTime<Utc>,
  pub value: f64,
}

impl DataPoint {
  pub fn new(time: DateTime<Utc>, value: f64) -> Self { Self { time, value } }

  /// Build a point from its textual wire form.
  pub fn parse(time: &str, value: &str) -> Result<Self> {
    let parsed_time =
      parse_point_time(time).ok_or_else(|| Error::InvalidTime(time.to_owned()))?;
    let parsed_value =
      parse_point_value(value).ok_or_else(|| Error::InvalidValue(value.to_owned()))?;
    Ok(Self::new(parsed_time, parsed_value))
  }
}

/// One `Property` block: a property symbol and its observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySeries {
  pub symbol: String,
  pub points: Vec<DataPoint>,
}

/// A complete upload: one monitoring point, one or more property blocks in
/// document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadData {
  /// National code of the monitoring point.
  pub monitoring_point_id: String,
  pub properties:          Vec<PropertySeries>,
}

impl UploadData {
  pub fn new(monitoring_point_id: impl Into<String>) -> Self {
    Self { monitoring_point_id: monitoring_point_id.into(), properties: Vec::new() }
  }

  /// Append a property block.
  pub fn with_series(
    mut self,
    symbol: impl Into<String>,
    points: impl IntoIterator<Item = DataPoint>,
  ) -> Self {
    self.properties.push(PropertySeries {
      symbol: symbol.into(),
      points: points.into_iter().collect(),
    });
    self
  }

  /// Enforce the construction contract for outgoing documents: a non-empty
  /// point id, at least one property, non-empty symbols, non-empty series and
  /// finite values.
  pub fn check(&self) -> Result<()> {
    if self.monitoring_point_id.trim().is_empty() {
      return Err(Error::EmptyMonitoringPointId);
    }
    if self.properties.is_empty() {
      return Err(Error::EmptySeries(String::new()));
    }
    for series in &self.properties {
      if series.symbol.trim().is_empty() {
        return Err(Error::EmptyPropertySymbol);
      }
      if series.points.is_empty() {
        return Err(Error::EmptySeries(series.symbol.clone()));
      }
      if let Some(p) = series.points.iter().find(|p| !p.value.is_finite()) {
        return Err(Error::NonFiniteValue {
          symbol: series.symbol.clone(),
          time:   p.time.to_rfc3339(),
        });
      }
    }
    Ok(())
  }

  pub fn point_count(&self) -> usize {
    self.properties.iter().map(|p| p.points.len()).sum()
  }
}

// ─── Wire value parsing ──────────────────────────────────────────────────────

/// Parse an `xs:dateTime` `PointTime`.
///
/// Only the strict lexical form is accepted: `YYYY-MM-DDThh:mm:ss`, an
/// optional fraction, then `Z`, `+hh:mm`, `-hh:mm` or nothing. An explicit
/// offset is converted to UTC; a time without offset is taken to be UTC
/// already.
pub fn parse_point_time(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if !is_xs_date_time(raw) {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|naive| naive.and_utc())
}

/// Lexical check for `xs:dateTime`. chrono alone is laxer: it also takes a
/// space or a lowercase `t` as separator and a lowercase `z`.
fn is_xs_date_time(raw: &str) -> bool {
  let Some((date, time)) = raw.split_once('T') else { return false };

  let date = date.strip_prefix('-').unwrap_or(date);
  let date_ok = match date.split('-').collect::<Vec<_>>()[..] {
    [year, month, day] => {
      year.len() >= 4 && digits(year) && fixed(month, 2) && fixed(day, 2)
    }
    _ => false,
  };

  let clock = if let Some(clock) = time.strip_suffix('Z') {
    clock
  } else if time.len() > 6 && matches!(time.as_bytes()[time.len() - 6], b'+' | b'-') {
    let (clock, zone) = time.split_at(time.len() - 6);
    if !hh_mm(&zone[1..]) {
      return false;
    }
    clock
  } else {
    time
  };
  let (hms, fraction) = match clock.split_once('.') {
    Some((hms, fraction)) => (hms, Some(fraction)),
    None => (clock, None),
  };
  let clock_ok = match hms.split(':').collect::<Vec<_>>()[..] {
    [h, m, s] => fixed(h, 2) && fixed(m, 2) && fixed(s, 2),
    _ => false,
  };

  date_ok && clock_ok && fraction.is_none_or(digits)
}

fn digits(s: &str) -> bool { !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) }

fn fixed(s: &str, len: usize) -> bool { s.len() == len && digits(s) }

fn hh_mm(s: &str) -> bool {
  matches!(s.split_once(':'), Some((h, m)) if fixed(h, 2) && fixed(m, 2))
}

/// Parse a numeric `PointValue`. Infinities and NaN are rejected.
pub fn parse_point_value(raw: &str) -> Option<f64> {
  raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// What one property block did to its time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesOutcome {
  pub symbol:         String,
  pub property_id:    i64,
  pub time_series_id: i64,
  /// Whether the series row was created by this upload.
  pub created:        bool,
  /// Points present in the document.
  pub received:       usize,
  /// Rows actually written; the rest were exact duplicates.
  pub inserted:       usize,
}

impl SeriesOutcome {
  pub fn duplicates(&self) -> usize { self.received - self.inserted }
}

/// The result of a committed upload transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
  pub family:   DatasetFamily,
  pub point_id: i64,
  pub series:   Vec<SeriesOutcome>,
}

impl UploadOutcome {
  pub fn inserted(&self) -> usize { self.series.iter().map(|s| s.inserted).sum() }

  pub fn received(&self) -> usize { self.series.iter().map(|s| s.received).sum() }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why an upload was not applied. Every variant leaves the store untouched.
#[derive(Debug, Error)]
pub enum IngestError<E> {
  #[error("unknown monitoring point: {0:?}")]
  UnknownMonitoringPoint(String),

  #[error("property {symbol:?} is not registered for monitoring point {point:?}")]
  PropertyNotAllowedForPoint { point: String, symbol: String },

  #[error("could not create time series for property {symbol:?} of point {point:?}")]
  TimeSeriesCreationFailed { point: String, symbol: String },

  #[error("store error: {0}")]
  Store(#[source] E),
}
