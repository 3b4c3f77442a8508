//! `UploadData` and `ErrorResponse` writers.

use std::io::Cursor;

use chrono::SecondsFormat;
use environet_core::upload::UploadData;
use quick_xml::{
  Writer,
  events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
  ErrorEntry, NS_ENVIRONET,
  error::{Error, Result},
};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

// ─── UploadData ──────────────────────────────────────────────────────────────

/// Render an upload for sending.
///
/// The document is checked first: the point id and every symbol must be
/// non-empty, every series must hold at least one point and every value must
/// be finite. A document built here always passes schema validation.
pub fn build_upload_xml(upload: &UploadData) -> Result<String> {
  upload.check()?;
  write_upload_xml(upload)
}

/// Render an upload without checking it. Property blocks with no points come
/// out as empty `TimeSeries` elements, which is how read responses report a
/// series with no results in range.
pub fn write_upload_xml(upload: &UploadData) -> Result<String> {
  let mut w = document()?;

  let mut root = BytesStart::new("environet:UploadData");
  root.push_attribute(("xmlns:environet", NS_ENVIRONET));
  emit(&mut w, Event::Start(root))?;
  text_elem(&mut w, "environet:MonitoringPointId", &upload.monitoring_point_id)?;

  for series in &upload.properties {
    start(&mut w, "environet:Property")?;
    text_elem(&mut w, "environet:PropertyId", &series.symbol)?;
    if series.points.is_empty() {
      emit(&mut w, Event::Empty(BytesStart::new("environet:TimeSeries")))?;
    } else {
      start(&mut w, "environet:TimeSeries")?;
      for point in &series.points {
        start(&mut w, "environet:Point")?;
        text_elem(
          &mut w,
          "environet:PointTime",
          &point.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )?;
        text_elem(&mut w, "environet:PointValue", &point.value.to_string())?;
        end(&mut w, "environet:Point")?;
      }
      end(&mut w, "environet:TimeSeries")?;
    }
    end(&mut w, "environet:Property")?;
  }

  end(&mut w, "environet:UploadData")?;
  finish(w)
}

// ─── ErrorResponse ───────────────────────────────────────────────────────────

/// Render the body of a failed request.
pub fn error_response(entries: &[ErrorEntry]) -> Result<Vec<u8>> {
  let mut w = document()?;

  let mut root = BytesStart::new("environet:ErrorResponse");
  root.push_attribute(("xmlns:environet", NS_ENVIRONET));
  emit(&mut w, Event::Start(root))?;
  for entry in entries {
    start(&mut w, "environet:Error")?;
    text_elem(&mut w, "environet:ErrorCode", &entry.code.to_string())?;
    text_elem(&mut w, "environet:ErrorMessage", &entry.message)?;
    end(&mut w, "environet:Error")?;
  }
  end(&mut w, "environet:ErrorResponse")?;

  Ok(w.into_inner().into_inner())
}

// ─── Writer helpers ──────────────────────────────────────────────────────────

fn document() -> Result<XmlWriter> {
  let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
  emit(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
  Ok(w)
}

fn emit(w: &mut XmlWriter, event: Event<'_>) -> Result<()> {
  w.write_event(event).map_err(|e| Error::Write(e.to_string()))
}

fn start(w: &mut XmlWriter, tag: &str) -> Result<()> {
  emit(w, Event::Start(BytesStart::new(tag)))
}

fn end(w: &mut XmlWriter, tag: &str) -> Result<()> {
  emit(w, Event::End(BytesEnd::new(tag)))
}

fn text_elem(w: &mut XmlWriter, tag: &str, text: &str) -> Result<()> {
  start(w, tag)?;
  emit(w, Event::Text(BytesText::new(text)))?;
  end(w, tag)
}

fn finish(w: XmlWriter) -> Result<String> {
  String::from_utf8(w.into_inner().into_inner()).map_err(|e| Error::Write(e.to_string()))
}
