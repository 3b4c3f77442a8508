//! Validation of an element tree against the fixed upload schema.
//!
//! ```text
//! UploadData      := MonitoringPointId Property+
//! Property        := PropertyId TimeSeries
//! TimeSeries      := Point+
//! Point           := PointTime PointValue
//! MonitoringPointId, PropertyId : non-empty string
//! PointTime                     : xs:dateTime
//! PointValue                    : number
//! ```
//!
//! Validation never stops at the first problem. Every violation is collected
//! so the sender gets one error entry per broken rule.

use environet_core::upload::{
  DataPoint, PropertySeries, UploadData, parse_point_time, parse_point_value,
};

use crate::{
  NS_ENVIRONET,
  error::{Error, Result, Violation},
  parse::Element,
};

const UNBOUNDED: usize = usize::MAX;

/// One particle of an element's content sequence.
#[derive(Clone, Copy)]
struct Particle {
  name: &'static str,
  min:  usize,
  max:  usize,
}

const fn one(name: &'static str) -> Particle { Particle { name, min: 1, max: 1 } }

const fn one_or_more(name: &'static str) -> Particle {
  Particle { name, min: 1, max: UNBOUNDED }
}

const UPLOAD_DATA: &[Particle] = &[one("MonitoringPointId"), one_or_more("Property")];
const PROPERTY: &[Particle] = &[one("PropertyId"), one("TimeSeries")];
const TIME_SERIES: &[Particle] = &[one_or_more("Point")];
const POINT: &[Particle] = &[one("PointTime"), one("PointValue")];

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Validate a parsed document and extract the upload it describes.
pub fn validate_upload(root: &Element) -> Result<UploadData> {
  let mut v = Validator::default();

  if !root.is(NS_ENVIRONET, "UploadData") {
    v.report(root, "No matching global declaration available for the validation root.");
    return Err(Error::Schema(v.violations));
  }

  let mut upload = UploadData::new(String::new());
  for child in v.sequence(root, UPLOAD_DATA) {
    match child.name.as_str() {
      "MonitoringPointId" => {
        if let Some(id) = v.identifier(child) {
          upload.monitoring_point_id = id;
        }
      }
      _ => {
        if let Some(series) = v.property(child) {
          upload.properties.push(series);
        }
      }
    }
  }

  if v.violations.is_empty() {
    Ok(upload)
  } else {
    Err(Error::Schema(v.violations))
  }
}

// ─── Validator ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Validator {
  violations: Vec<Violation>,
}

impl Validator {
  fn report(&mut self, element: &Element, message: impl Into<String>) {
    self.violations.push(Violation {
      line:    element.line,
      element: element.display_name(),
      message: message.into(),
    });
  }

  /// No element of the upload schema declares attributes.
  fn no_attributes(&mut self, element: &Element) {
    for attribute in &element.attributes {
      self.report(element, format!("The attribute '{attribute}' is not allowed."));
    }
  }

  /// Match the children of a complex element against `particles` and return
  /// the accepted ones in document order. Rejected children and unmet
  /// minimums are reported. The cursor only moves when a child is accepted,
  /// so one stray element does not cascade into follow-up violations.
  fn sequence<'e>(&mut self, parent: &'e Element, particles: &[Particle]) -> Vec<&'e Element> {
    self.no_attributes(parent);
    if !parent.text.trim().is_empty() {
      self.report(
        parent,
        "Character content other than whitespace is not allowed because the content type is \
         'element-only'.",
      );
    }

    let mut accepted = Vec::new();
    let mut pos = 0;
    let mut count = 0;

    for child in &parent.children {
      let mut probe = pos;
      let mut probe_count = count;
      loop {
        let Some(particle) = particles.get(probe) else {
          self.report(child, "This element is not expected.");
          break;
        };
        if child.is(NS_ENVIRONET, particle.name) && probe_count < particle.max {
          pos = probe;
          count = probe_count + 1;
          accepted.push(child);
          break;
        }
        if probe_count >= particle.min {
          probe += 1;
          probe_count = 0;
          continue;
        }
        self.report(
          child,
          format!("This element is not expected. Expected is ( {} ).", particle.name),
        );
        break;
      }
    }

    let mut missing = Vec::new();
    for (i, particle) in particles.iter().enumerate().skip(pos) {
      let seen = if i == pos { count } else { 0 };
      if seen < particle.min {
        missing.push(particle.name);
      }
    }
    if !missing.is_empty() {
      self.report(
        parent,
        format!("Missing child element(s). Expected is ( {} ).", missing.join(", ")),
      );
    }

    accepted
  }

  /// Text content of a simple-typed element, or `None` after reporting child
  /// elements inside it.
  fn simple<'e>(&mut self, element: &'e Element) -> Option<&'e str> {
    self.no_attributes(element);
    if !element.children.is_empty() {
      self.report(
        element,
        "Element content is not allowed, because the content type is a simple type.",
      );
      return None;
    }
    Some(element.text.trim())
  }

  fn identifier(&mut self, element: &Element) -> Option<String> {
    let text = self.simple(element)?;
    if text.is_empty() {
      self.report(
        element,
        "[facet 'minLength'] The value has a length of '0'; this underruns the allowed \
         minimum length of '1'.",
      );
      return None;
    }
    Some(text.to_owned())
  }

  fn property(&mut self, element: &Element) -> Option<PropertySeries> {
    let mut symbol = None;
    let mut points = None;
    for child in self.sequence(element, PROPERTY) {
      match child.name.as_str() {
        "PropertyId" => symbol = self.identifier(child),
        _ => points = Some(self.time_series(child)),
      }
    }
    Some(PropertySeries { symbol: symbol?, points: points? })
  }

  fn time_series(&mut self, element: &Element) -> Vec<DataPoint> {
    self
      .sequence(element, TIME_SERIES)
      .into_iter()
      .filter_map(|point| self.point(point))
      .collect()
  }

  fn point(&mut self, element: &Element) -> Option<DataPoint> {
    let mut time = None;
    let mut value = None;
    for child in self.sequence(element, POINT) {
      let Some(text) = self.simple(child) else { continue };
      match child.name.as_str() {
        "PointTime" => {
          time = parse_point_time(text);
          if time.is_none() {
            self.report(
              child,
              format!("'{text}' is not a valid value of the atomic type 'xs:dateTime'."),
            );
          }
        }
        _ => {
          value = parse_point_value(text);
          if value.is_none() {
            self.report(
              child,
              format!("'{text}' is not a valid value of the atomic type 'xs:double'."),
            );
          }
        }
      }
    }
    Some(DataPoint::new(time?, value?))
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::parse_upload;

  fn wrap(inner: &str) -> String {
    format!(r#"<environet:UploadData xmlns:environet="environet">{inner}</environet:UploadData>"#)
  }

  fn point(time: &str, value: &str) -> String {
    format!(
      "<environet:Point><environet:PointTime>{time}</environet:PointTime>\
       <environet:PointValue>{value}</environet:PointValue></environet:Point>"
    )
  }

  fn property(symbol: &str, points: &str) -> String {
    format!(
      "<environet:Property><environet:PropertyId>{symbol}</environet:PropertyId>\
       <environet:TimeSeries>{points}</environet:TimeSeries></environet:Property>"
    )
  }

  fn violations(xml: &str) -> Vec<Violation> {
    match parse_upload(xml) {
      Err(Error::Schema(v)) => v,
      other => panic!("expected schema violations, got {other:?}"),
    }
  }

  #[test]
  fn accepts_a_valid_document_in_order() {
    let xml = wrap(&format!(
      "<environet:MonitoringPointId>H001</environet:MonitoringPointId>{}{}",
      property("h", &(point("2024-01-01T00:00:00Z", "12.5") + &point("2024-01-01T01:00:00Z", "13"))),
      property("Q", &point("2024-01-01T00:00:00+01:00", "-0.25")),
    ));
    let upload = parse_upload(&xml).unwrap();

    assert_eq!(upload.monitoring_point_id, "H001");
    assert_eq!(upload.properties.len(), 2);
    assert_eq!(upload.properties[0].symbol, "h");
    assert_eq!(upload.properties[0].points.len(), 2);
    assert_eq!(upload.properties[0].points[0].value, 12.5);
    assert_eq!(
      upload.properties[1].points[0].time,
      Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap()
    );
  }

  #[test]
  fn wrong_root_is_a_single_violation() {
    let v = violations(r#"<environet:Other xmlns:environet="environet"/>"#);
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].element, "Other");
  }

  #[test]
  fn root_outside_the_namespace_is_rejected() {
    let v = violations("<UploadData/>");
    assert_eq!(v.len(), 1);
  }

  #[test]
  fn independent_violations_are_all_reported() {
    // An empty point id, a bad time, a bad value and a stray element.
    let xml = wrap(&format!(
      "<environet:MonitoringPointId></environet:MonitoringPointId>{}<environet:Bogus/>",
      property("h", &(point("not-a-time", "1") + &point("2024-01-01T00:00:00Z", "abc"))),
    ));
    let v = violations(&xml);
    assert_eq!(v.len(), 4, "{v:#?}");

    let messages: Vec<String> = v.iter().map(ToString::to_string).collect();
    assert!(messages.iter().any(|m| m.contains("'not-a-time'")), "{messages:#?}");
    assert!(messages.iter().any(|m| m.contains("'abc'")), "{messages:#?}");
    assert!(messages.iter().any(|m| m.contains("Bogus")), "{messages:#?}");
  }

  #[test]
  fn missing_children_are_named() {
    let xml = wrap("<environet:MonitoringPointId>H001</environet:MonitoringPointId>");
    let v = violations(&xml);
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].element, "UploadData");
    assert!(v[0].message.contains("Property"), "{}", v[0].message);
  }

  #[test]
  fn empty_time_series_is_a_violation() {
    let xml = wrap(&format!(
      "<environet:MonitoringPointId>H001</environet:MonitoringPointId>{}",
      property("h", ""),
    ));
    let v = violations(&xml);
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].element, "TimeSeries");
  }

  #[test]
  fn empty_identifiers_are_violations() {
    let xml = wrap(&format!(
      "<environet:MonitoringPointId> </environet:MonitoringPointId>{}",
      property("", &point("2024-01-01T00:00:00Z", "1")),
    ));
    let v = violations(&xml);
    assert_eq!(v.len(), 2, "{v:#?}");
    assert!(v.iter().all(|x| x.message.contains("minLength")));
  }

  #[test]
  fn out_of_order_children_are_reported_with_the_expected_name() {
    let xml = wrap(&format!(
      "{}<environet:MonitoringPointId>H001</environet:MonitoringPointId>",
      property("h", &point("2024-01-01T00:00:00Z", "1")),
    ));
    let v = violations(&xml);
    assert!(v.iter().any(|x| x.element == "Property"
      && x.message.contains("Expected is ( MonitoringPointId )")));
  }

  #[test]
  fn text_in_complex_elements_and_children_in_leaves() {
    let xml = wrap(&format!(
      "stray<environet:MonitoringPointId><environet:X/></environet:MonitoringPointId>{}",
      property("h", &point("2024-01-01T00:00:00Z", "1")),
    ));
    let v = violations(&xml);
    assert!(v.iter().any(|x| x.element == "UploadData" && x.message.contains("element-only")));
    assert!(
      v.iter()
        .any(|x| x.element == "MonitoringPointId" && x.message.contains("simple type"))
    );
  }

  #[test]
  fn date_times_must_use_the_strict_lexical_form() {
    let xml = wrap(&format!(
      "<environet:MonitoringPointId>H001</environet:MonitoringPointId>{}",
      property(
        "h",
        &(point("2024-01-01 00:00:00Z", "1") + &point("2024-01-01t00:00:00z", "2")),
      ),
    ));
    let v = violations(&xml);
    assert_eq!(v.len(), 2, "{v:#?}");
    assert!(v.iter().all(|x| x.element == "PointTime" && x.message.contains("xs:dateTime")));
  }

  #[test]
  fn attributes_are_not_allowed_anywhere() {
    let xml = format!(
      r#"<environet:UploadData xmlns:environet="environet" bogus="1">
<environet:MonitoringPointId>H001</environet:MonitoringPointId>
<environet:Property><environet:PropertyId unit="cm">h</environet:PropertyId>
<environet:TimeSeries>{}</environet:TimeSeries></environet:Property>
</environet:UploadData>"#,
      point("2024-01-01T00:00:00Z", "1"),
    );
    let v = violations(&xml);
    assert_eq!(v.len(), 2, "{v:#?}");
    assert_eq!(v[0].element, "UploadData");
    assert_eq!(v[0].message, "The attribute 'bogus' is not allowed.");
    assert_eq!(v[1].element, "PropertyId");
    assert!(v[1].message.contains("'unit'"));
  }

  #[test]
  fn schema_instance_attributes_are_allowed() {
    let xml = format!(
      r#"<environet:UploadData xmlns:environet="environet"
  xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xsi:schemaLocation="environet upload.xsd">
<environet:MonitoringPointId>H001</environet:MonitoringPointId>{}</environet:UploadData>"#,
      property("h", &point("2024-01-01T00:00:00Z", "1")),
    );
    assert!(parse_upload(&xml).is_ok());
  }

  #[test]
  fn violations_carry_lines() {
    let xml = "<environet:UploadData xmlns:environet=\"environet\">\n\
               <environet:MonitoringPointId>H001</environet:MonitoringPointId>\n\
               <environet:Property>\n\
               <environet:PropertyId>h</environet:PropertyId>\n\
               <environet:TimeSeries>\n\
               <environet:Point><environet:PointTime>x</environet:PointTime>\
               <environet:PointValue>1</environet:PointValue></environet:Point>\n\
               </environet:TimeSeries></environet:Property></environet:UploadData>";
    let v = violations(xml);
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].line, 6);
    assert_eq!(v[0].element, "PointTime");
  }
}
