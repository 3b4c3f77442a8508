//! Error types for `environet-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  // ── Upload document construction ─────────────────────────────────────────
  #[error("monitoring point id must not be empty")]
  EmptyMonitoringPointId,

  #[error("property symbol must not be empty")]
  EmptyPropertySymbol,

  #[error("property {0:?} has no observations")]
  EmptySeries(String),

  #[error("property {symbol:?} has a non-finite value at {time}")]
  NonFiniteValue { symbol: String, time: String },

  #[error("invalid observation time {0:?}")]
  InvalidTime(String),

  #[error("invalid observation value {0:?}")]
  InvalidValue(String),

  // ── Signature protocol ───────────────────────────────────────────────────
  #[error("authorization header is not a Signature header")]
  NotSignatureScheme,

  #[error("malformed signature parameter: {0:?}")]
  MalformedParameter(String),

  #[error("duplicate signature parameter: {0}")]
  DuplicateParameter(String),

  #[error("unknown signature parameter: {0}")]
  UnknownParameter(String),

  #[error("missing signature parameter: {0}")]
  MissingParameter(&'static str),

  #[error("unsupported signature algorithm: {0:?}")]
  UnsupportedAlgorithm(String),

  #[error("signature is not valid base64")]
  SignatureEncoding,

  #[error("invalid key material: {0}")]
  InvalidKey(String),

  #[error("signature does not match")]
  SignatureMismatch,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
