//! Well-formedness check and a small namespace-resolved element tree.
//!
//! The tree is deliberately minimal: element names, resolved namespaces,
//! concatenated text, children and the line each element starts on. Schema
//! rules are checked separately in [`crate::schema`].

use quick_xml::{
  NsReader,
  events::{BytesStart, Event},
  name::ResolveResult,
};

use crate::{ErrorEntry, NS_ENVIRONET, error::Error, Result};

/// Instance attributes (`xsi:schemaLocation` and friends) are allowed on any
/// element.
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

// ─── Tree ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
  /// Resolved namespace URI, `None` when the element is unqualified.
  pub namespace:  Option<String>,
  /// Local name without prefix.
  pub name:       String,
  /// Concatenated character data directly inside this element, untrimmed
  /// except for whitespace-only runs which the reader drops.
  pub text:       String,
  /// Attributes other than namespace declarations and `xsi:` hints, as
  /// display names.
  pub attributes: Vec<String>,
  pub children:   Vec<Element>,
  /// 1-based line of the start tag.
  pub line:       usize,
}

impl Element {
  fn new(namespace: Option<String>, name: String, line: usize) -> Self {
    Self {
      namespace,
      name,
      text: String::new(),
      attributes: Vec::new(),
      children: Vec::new(),
      line,
    }
  }

  /// Whether this element is `{namespace}name`.
  pub fn is(&self, namespace: &str, name: &str) -> bool {
    self.name == name && self.namespace.as_deref() == Some(namespace)
  }

  /// The `environet` children called `name`, in document order.
  pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    self.children.iter().filter(move |c| c.is(NS_ENVIRONET, name))
  }

  /// The first `environet` child called `name`.
  pub fn child(&self, name: &str) -> Option<&Element> {
    self.children.iter().find(|c| c.is(NS_ENVIRONET, name))
  }

  /// The element name as it should appear in messages, with a prefix hint
  /// when it is outside the expected namespace.
  pub fn display_name(&self) -> String {
    match self.namespace.as_deref() {
      Some(NS_ENVIRONET) => self.name.clone(),
      Some(ns) => format!("{{{ns}}}{}", self.name),
      None => self.name.clone(),
    }
  }
}

// ─── Document parsing ────────────────────────────────────────────────────────

/// Parse `xml` into an element tree, failing on the first well-formedness
/// error with its line.
pub fn parse_document(xml: &str) -> Result<Element> {
  let mut reader = NsReader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut stack: Vec<Element> = Vec::new();
  let mut root: Option<Element> = None;

  loop {
    let (ns, event) = match reader.read_resolved_event() {
      Ok((ns, event)) => (resolve_namespace(ns), event),
      Err(e) => {
        let at = reader.error_position() as usize;
        return Err(malformed(line_at(xml, at), e.to_string()));
      }
    };
    let end = reader.buffer_position() as usize;

    match event {
      Event::Start(start) => {
        // `<` + tag content + `>`
        let line = line_at(xml, end.saturating_sub(start.len() + 2));
        let element = open_element(&reader, ns, &start, line)?;
        if stack.is_empty() && root.is_some() {
          return Err(malformed(line, "content after the root element"));
        }
        stack.push(element);
      }
      Event::Empty(start) => {
        // `<` + tag content + `/>`
        let line = line_at(xml, end.saturating_sub(start.len() + 3));
        let element = open_element(&reader, ns, &start, line)?;
        attach(&mut stack, &mut root, element, line)?;
      }
      Event::End(_) => {
        let line = line_at(xml, end);
        let element = stack
          .pop()
          .ok_or_else(|| malformed(line, "closing tag without matching start"))?;
        attach(&mut stack, &mut root, element, line)?;
      }
      Event::Text(text) => {
        let line = line_at(xml, end);
        let text = text.unescape().map_err(|e| malformed(line, e.to_string()))?;
        append_text(&mut stack, &text, line)?;
      }
      Event::CData(cdata) => {
        let line = line_at(xml, end);
        let text = String::from_utf8(cdata.into_inner().into_owned())
          .map_err(|e| malformed(line, e.to_string()))?;
        append_text(&mut stack, &text, line)?;
      }
      Event::Eof => break,
      // Declarations, comments, processing instructions, doctypes.
      _ => {}
    }
  }

  if let Some(open) = stack.last() {
    return Err(malformed(
      line_at(xml, xml.len()),
      format!("unexpected end of document, <{}> is not closed", open.name),
    ));
  }
  root.ok_or_else(|| malformed(line_at(xml, xml.len()), "document has no root element"))
}

/// The namespace an element resolved to, or the undeclared prefix it used.
fn resolve_namespace(ns: ResolveResult<'_>) -> std::result::Result<Option<String>, String> {
  match ns {
    ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.into_inner()).into_owned())),
    ResolveResult::Unbound => Ok(None),
    ResolveResult::Unknown(prefix) => Err(String::from_utf8_lossy(&prefix).into_owned()),
  }
}

fn open_element(
  reader: &NsReader<&[u8]>,
  ns: std::result::Result<Option<String>, String>,
  start: &BytesStart<'_>,
  line: usize,
) -> Result<Element> {
  let namespace = ns.map_err(|prefix| {
    malformed(line, format!("namespace prefix {prefix:?} is not declared"))
  })?;
  let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
  let mut element = Element::new(namespace, name, line);

  for attr in start.attributes() {
    let attr = attr.map_err(|e| malformed(line, e.to_string()))?;
    if attr.key.as_namespace_binding().is_some() {
      continue;
    }
    let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
    match reader.resolve_attribute(attr.key).0 {
      ResolveResult::Bound(ns) if ns.into_inner() == NS_XSI.as_bytes() => {}
      ResolveResult::Bound(ns) => element
        .attributes
        .push(format!("{{{}}}{local}", String::from_utf8_lossy(ns.into_inner()))),
      ResolveResult::Unbound => element.attributes.push(local),
      ResolveResult::Unknown(prefix) => {
        let prefix = String::from_utf8_lossy(&prefix).into_owned();
        return Err(malformed(line, format!("namespace prefix {prefix:?} is not declared")));
      }
    }
  }
  Ok(element)
}

fn attach(
  stack: &mut [Element],
  root: &mut Option<Element>,
  element: Element,
  line: usize,
) -> Result<()> {
  if let Some(parent) = stack.last_mut() {
    parent.children.push(element);
  } else if root.is_some() {
    return Err(malformed(line, "content after the root element"));
  } else {
    *root = Some(element);
  }
  Ok(())
}

fn append_text(stack: &mut [Element], text: &str, line: usize) -> Result<()> {
  match stack.last_mut() {
    Some(element) => {
      element.text.push_str(text);
      Ok(())
    }
    None if text.trim().is_empty() => Ok(()),
    None => Err(malformed(line, "text outside the root element")),
  }
}

fn malformed(line: usize, message: impl Into<String>) -> Error {
  Error::Malformed { line, message: message.into() }
}

/// 1-based line number of byte `offset` in `src`.
pub(crate) fn line_at(src: &str, offset: usize) -> usize {
  let end = offset.min(src.len());
  src.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

// ─── ErrorResponse ───────────────────────────────────────────────────────────

/// Read the entries of an `ErrorResponse` document. Entries whose code is not
/// an integer are kept with code `0`.
pub fn parse_error_response(xml: &str) -> Result<Vec<ErrorEntry>> {
  let root = parse_document(xml)?;
  Ok(
    root
      .children_named("Error")
      .map(|error| ErrorEntry {
        code:    error
          .child("ErrorCode")
          .and_then(|c| c.text.trim().parse().ok())
          .unwrap_or(0),
        message: error
          .child("ErrorMessage")
          .map(|m| m.text.trim().to_owned())
          .unwrap_or_default(),
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_a_namespaced_tree() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<environet:UploadData xmlns:environet="environet">
  <environet:MonitoringPointId>H001</environet:MonitoringPointId>
  <environet:Property/>
</environet:UploadData>"#;
    let root = parse_document(xml).unwrap();
    assert!(root.is(NS_ENVIRONET, "UploadData"));
    assert_eq!(root.line, 2);
    assert_eq!(root.children.len(), 2);
    assert_eq!(root.child("MonitoringPointId").unwrap().text, "H001");
    assert_eq!(root.child("MonitoringPointId").unwrap().line, 3);
  }

  #[test]
  fn default_namespace_resolves_too() {
    let root = parse_document(r#"<UploadData xmlns="environet"><Property/></UploadData>"#).unwrap();
    assert!(root.is(NS_ENVIRONET, "UploadData"));
    assert!(root.children[0].is(NS_ENVIRONET, "Property"));
  }

  #[test]
  fn keeps_attributes_but_not_namespace_declarations() {
    let xml = r#"<environet:UploadData xmlns:environet="environet"
      xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
      xsi:schemaLocation="environet upload.xsd" bogus="1" environet:id="x"/>"#;
    let root = parse_document(xml).unwrap();
    assert_eq!(root.attributes, vec!["bogus".to_string(), "{environet}id".to_string()]);
  }

  #[test]
  fn attribute_with_undeclared_prefix_is_malformed() {
    assert!(matches!(parse_document(r#"<a x:y="1"/>"#), Err(Error::Malformed { .. })));
  }

  #[test]
  fn entities_and_cdata_become_text() {
    let root = parse_document("<a>x &amp; <![CDATA[<y>]]></a>").unwrap();
    assert_eq!(root.text, "x &<y>");
  }

  #[test]
  fn mismatched_tags_are_malformed() {
    let err = parse_document("<a>\n<b></a>").unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");
  }

  #[test]
  fn unclosed_root_is_malformed() {
    let err = parse_document("<a><b/>").unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");
  }

  #[test]
  fn empty_and_non_xml_bodies_are_malformed() {
    assert!(matches!(parse_document(""), Err(Error::Malformed { .. })));
    assert!(matches!(parse_document("hello"), Err(Error::Malformed { .. })));
  }

  #[test]
  fn second_root_is_malformed() {
    assert!(matches!(parse_document("<a/><b/>"), Err(Error::Malformed { .. })));
  }

  #[test]
  fn undeclared_prefix_is_malformed() {
    let err = parse_document("<x:a/>").unwrap_err();
    assert!(matches!(err, Error::Malformed { line: 1, .. }), "{err}");
  }

  #[test]
  fn reads_error_response_entries() {
    let xml = r#"<environet:ErrorResponse xmlns:environet="environet">
      <environet:Error><environet:ErrorCode>401</environet:ErrorCode>
        <environet:ErrorMessage>Unknown monitoring point</environet:ErrorMessage></environet:Error>
      <environet:Error><environet:ErrorCode>x</environet:ErrorCode></environet:Error>
    </environet:ErrorResponse>"#;
    let entries = parse_error_response(xml).unwrap();
    assert_eq!(entries, vec![
      ErrorEntry { code: 401, message: "Unknown monitoring point".into() },
      ErrorEntry { code: 0, message: String::new() },
    ]);
  }
}
