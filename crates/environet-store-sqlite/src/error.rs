//! Error type for `environet-store-sqlite`.

use environet_core::monitoring::DatasetFamily;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] environet_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum column held a value this version does not know.
  #[error("unexpected stored value: {0}")]
  Decode(String),

  #[error("account not found: {0}")]
  AccountNotFound(i64),

  #[error("{family} monitoring point not found: {id}")]
  PointNotFound { family: DatasetFamily, id: i64 },

  #[error("{family} observed property not found: {id}")]
  PropertyNotFound { family: DatasetFamily, id: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
