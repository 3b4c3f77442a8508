//! Error types for the environet-xml codec.

use std::fmt;

use thiserror::Error;

/// One schema rule broken by a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
  /// 1-based line of the offending element.
  pub line:    usize,
  /// Local name of the offending element.
  pub element: String,
  pub message: String,
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "line {}: Element '{}': {}", self.line, self.element, self.message)
  }
}

#[derive(Debug, Error)]
pub enum Error {
  /// The body is not well-formed XML. Nothing else was checked.
  #[error("malformed XML at line {line}: {message}")]
  Malformed { line: usize, message: String },

  /// The body is well-formed but breaks the upload schema. Every violation
  /// found is listed.
  #[error("document violates the schema ({} violation(s))", .0.len())]
  Schema(Vec<Violation>),

  #[error("invalid document: {0}")]
  Document(#[from] environet_core::Error),

  #[error("xml write error: {0}")]
  Write(String),
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self { Error::Write(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
