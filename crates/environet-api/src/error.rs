//! API error type and its `ErrorResponse` rendering.
//!
//! Every stage of the request pipeline fails with an [`ApiError`]. The
//! numeric codes are part of the wire contract and never change.

use axum::{
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use environet_core::upload::IngestError;
use environet_xml::{ErrorEntry, Violation, error_response};
use thiserror::Error;

const SERVER_ERROR_MESSAGE: &str = "Server error";

#[derive(Debug, Error)]
pub enum ApiError {
  // ── Authentication ────────────────────────────────────────────────────────
  #[error("missing Authorization header")]
  MissingAuthHeader,

  #[error("malformed Authorization header: {0}")]
  MalformedAuthHeader(String),

  #[error("unknown sender: {0}")]
  UnknownSender(String),

  #[error("no public key registered for {0}")]
  NoPublicKeyRegistered(String),

  #[error("missing token")]
  MissingToken,

  #[error("invalid signature")]
  InvalidSignature,

  // ── Authorization ─────────────────────────────────────────────────────────
  #[error("forbidden")]
  Forbidden,

  // ── Request document ──────────────────────────────────────────────────────
  #[error("malformed XML: {0}")]
  MalformedXml(String),

  #[error("schema violation ({} entries)", .0.len())]
  SchemaViolation(Vec<Violation>),

  #[error("request body exceeds {0} bytes")]
  BodyTooLarge(usize),

  #[error("invalid query: {0}")]
  InvalidQuery(String),

  // ── Semantic ──────────────────────────────────────────────────────────────
  #[error("unknown monitoring point: {0}")]
  UnknownMonitoringPoint(String),

  #[error("property {symbol} is not allowed for monitoring point {point}")]
  PropertyNotAllowedForPoint { point: String, symbol: String },

  #[error("could not create time series for {symbol} of monitoring point {point}")]
  TimeSeriesCreationFailed { point: String, symbol: String },

  // ── Unclassified ──────────────────────────────────────────────────────────
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ApiError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn code(&self) -> u16 {
    match self {
      Self::MissingAuthHeader => 101,
      Self::MalformedAuthHeader(_) => 102,
      Self::UnknownSender(_) => 103,
      Self::NoPublicKeyRegistered(_) => 104,
      Self::MissingToken => 105,
      Self::InvalidSignature => 106,
      Self::Forbidden => 201,
      Self::MalformedXml(_) => 301,
      Self::SchemaViolation(_) => 302,
      Self::BodyTooLarge(_) => 303,
      Self::InvalidQuery(_) => 304,
      Self::UnknownMonitoringPoint(_) => 401,
      Self::PropertyNotAllowedForPoint { .. } => 402,
      Self::TimeSeriesCreationFailed { .. } => 403,
      Self::Store(_) | Self::Internal(_) => 500,
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Self::MissingAuthHeader
      | Self::MalformedAuthHeader(_)
      | Self::UnknownSender(_)
      | Self::NoPublicKeyRegistered(_)
      | Self::MissingToken
      | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
      Self::Forbidden => StatusCode::FORBIDDEN,
      Self::MalformedXml(_)
      | Self::SchemaViolation(_)
      | Self::InvalidQuery(_)
      | Self::UnknownMonitoringPoint(_)
      | Self::PropertyNotAllowedForPoint { .. } => StatusCode::BAD_REQUEST,
      Self::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      Self::TimeSeriesCreationFailed { .. } | Self::Store(_) | Self::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  /// The `Error` entries sent to the client. Schema violations produce one
  /// entry each; server faults never expose their detail.
  pub fn entries(&self) -> Vec<ErrorEntry> {
    match self {
      Self::SchemaViolation(violations) => violations
        .iter()
        .map(|v| ErrorEntry::new(self.code(), v.to_string()))
        .collect(),
      Self::Store(_) | Self::Internal(_) => vec![ErrorEntry::new(500, SERVER_ERROR_MESSAGE)],
      Self::MissingAuthHeader => vec![ErrorEntry::new(self.code(), "Authorization header is missing")],
      Self::MalformedAuthHeader(_) => {
        vec![ErrorEntry::new(self.code(), "Authorization header is malformed")]
      }
      Self::InvalidSignature => vec![ErrorEntry::new(self.code(), "Invalid signature")],
      Self::Forbidden => {
        vec![ErrorEntry::new(self.code(), "Not authorized to perform this operation")]
      }
      other => vec![ErrorEntry::new(other.code(), capitalize(&other.to_string()))],
    }
  }
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

impl From<environet_xml::Error> for ApiError {
  fn from(e: environet_xml::Error) -> Self {
    match e {
      environet_xml::Error::Malformed { line, message } => {
        Self::MalformedXml(format!("line {line}: {message}"))
      }
      environet_xml::Error::Schema(violations) => Self::SchemaViolation(violations),
      other => Self::Internal(other.to_string()),
    }
  }
}

impl<E> From<IngestError<E>> for ApiError
where
  E: std::error::Error + Send + Sync + 'static,
{
  fn from(e: IngestError<E>) -> Self {
    match e {
      IngestError::UnknownMonitoringPoint(point) => Self::UnknownMonitoringPoint(point),
      IngestError::PropertyNotAllowedForPoint { point, symbol } => {
        Self::PropertyNotAllowedForPoint { point, symbol }
      }
      IngestError::TimeSeriesCreationFailed { point, symbol } => {
        Self::TimeSeriesCreationFailed { point, symbol }
      }
      IngestError::Store(e) => Self::store(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = ?self, "request failed");
    } else {
      tracing::debug!(code = self.code(), error = %self, "request rejected");
    }

    match error_response(&self.entries()) {
      Ok(body) => {
        let mut res = (status, body).into_response();
        res.headers_mut().insert(
          header::CONTENT_TYPE,
          HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        res
      }
      Err(e) => {
        tracing::error!(error = %e, "could not render ErrorResponse");
        (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE).into_response()
      }
    }
  }
}
