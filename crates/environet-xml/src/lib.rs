//! XML codec for Environet uploads.
//!
//! Reads `UploadData` request bodies in two stages, a well-formedness parse
//! followed by schema validation that reports every violation it finds, and
//! writes `UploadData` and `ErrorResponse` documents. Pure synchronous; no
//! HTTP or database dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use environet_xml::parse_upload;
//!
//! let body = r#"<environet:UploadData xmlns:environet="environet">
//!   <environet:MonitoringPointId>H001</environet:MonitoringPointId>
//!   <environet:Property>
//!     <environet:PropertyId>h</environet:PropertyId>
//!     <environet:TimeSeries>
//!       <environet:Point>
//!         <environet:PointTime>2024-01-01T00:00:00Z</environet:PointTime>
//!         <environet:PointValue>12.5</environet:PointValue>
//!       </environet:Point>
//!     </environet:TimeSeries>
//!   </environet:Property>
//! </environet:UploadData>"#;
//! let upload = parse_upload(body).unwrap();
//! assert_eq!(upload.monitoring_point_id, "H001");
//! ```

pub mod error;
mod parse;
mod schema;
mod serialize;

use environet_core::upload::UploadData;

pub use error::{Error, Result, Violation};
pub use parse::{Element, parse_document, parse_error_response};
pub use schema::validate_upload;
pub use serialize::{build_upload_xml, error_response, write_upload_xml};

/// Namespace URI of every Environet document element.
pub const NS_ENVIRONET: &str = "environet";

/// One `Error` entry of an `ErrorResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
  pub code:    u16,
  pub message: String,
}

impl ErrorEntry {
  pub fn new(code: u16, message: impl Into<String>) -> Self {
    Self { code, message: message.into() }
  }
}

/// Parse and validate an upload body.
///
/// Fails with [`Error::Malformed`] when the body is not well-formed XML, and
/// with [`Error::Schema`] listing every violation when it does not match the
/// upload schema.
pub fn parse_upload(xml: &str) -> Result<UploadData> {
  let root = parse_document(xml)?;
  validate_upload(&root)
}
