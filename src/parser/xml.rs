//! Owned element tree read with `quick-xml`.
//!
//! Calculation views mix prefixed and unprefixed element names, so every
//! lookup here matches on the local name only.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{TransformationError, TransformationResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub local_name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
    /// Byte offset of the start tag in the document.
    pub position: usize,
}

fn local_part(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>, position: usize) -> TransformationResult<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let local_name = local_part(&name).to_string();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| {
                TransformationError::parse_at(&format!("malformed attribute: {}", e), &name, position)
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| TransformationError::parse_at(&e.to_string(), &name, position))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            local_name,
            attributes,
            text: String::new(),
            children: Vec::new(),
            position,
        })
    }

    /// Attribute by exact qualified name, falling back to an unprefixed match.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| {
                if name.contains(':') {
                    None
                } else {
                    self.attributes
                        .iter()
                        .find(|(k, _)| !k.contains(':') && local_part(k) == name)
                }
            })
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty attribute among `names`.
    pub fn attr_any(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.attr(n))
            .find(|v| !v.is_empty())
    }

    pub fn attr_flag(&self, name: &str) -> bool {
        self.attr(name)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// `xsi:type` under whatever prefix the document bound to the schema-instance namespace.
    pub fn xsi_type(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.contains(':') && local_part(k) == "type" && !k.starts_with("xmlns"))
            .map(|(_, v)| v.as_str())
    }

    /// Local part of `xsi:type`, e.g. `JoinView` for `Calculation:JoinView`.
    pub fn type_name(&self) -> &str {
        self.xsi_type().map(local_part).unwrap_or("")
    }

    pub fn is_nil(&self) -> bool {
        self.attributes
            .iter()
            .any(|(k, v)| local_part(k) == "nil" && v.eq_ignore_ascii_case("true"))
    }

    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name == local)
    }

    pub fn children<'a>(&'a self, local: &str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        let local = local.to_string();
        self.children.iter().filter(move |c| c.local_name == local)
    }

    /// Elements reached by following `path` one child level per segment.
    pub fn path(&self, path: &[&str]) -> Vec<&XmlElement> {
        let mut current: Vec<&XmlElement> = vec![self];
        for segment in path {
            current = current
                .into_iter()
                .flat_map(|e| e.children(segment))
                .collect();
        }
        current
    }

    pub fn first(&self, path: &[&str]) -> Option<&XmlElement> {
        self.path(path).into_iter().next()
    }

    /// Trimmed text of the first element at `path`, when non-empty.
    pub fn text_at(&self, path: &[&str]) -> Option<String> {
        self.first(path)
            .map(|e| e.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn trimmed_text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// All descendants named `local`, depth first.
    pub fn descendants<'a>(&'a self, local: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        for child in &self.children {
            if child.local_name == local {
                found.push(child);
            }
            found.extend(child.descendants(local));
        }
        found
    }
}

/// Parse a whole document and return its root element.
pub fn parse_document(bytes: &[u8]) -> TransformationResult<XmlElement> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position() as usize;
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            let element = stack.last().map(|e| e.name.as_str()).unwrap_or("document");
            TransformationError::parse_at(&format!("malformed XML: {}", e), element, position)
        })?;
        match event {
            Event::Start(start) => {
                stack.push(XmlElement::from_start(&start, position)?);
            }
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start, position)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let value = text.unescape().map_err(|e| {
                        TransformationError::parse_at(&e.to_string(), &current.name, position)
                    })?;
                    current.text.push_str(&value);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(TransformationError::parse_at(
            "unclosed element at end of document",
            &open.name,
            open.position,
        ));
    }
    root.ok_or_else(|| TransformationError::parse("document has no root element", "document"))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<Calculation:scenario xmlns:Calculation="http://www.sap.com/ndb/BiModelCalculation.ecore"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" id="CV_TEST">
  <descriptions defaultDescription="Test &amp; view"/>
  <calculationViews>
    <calculationView xsi:type="Calculation:ProjectionView" id="Projection_1">
      <input node="#T"/>
      <calculatedViewAttributes>
        <calculatedViewAttribute id="C" datatype="VARCHAR">
          <formula><![CDATA["A" < 'x']]></formula>
        </calculatedViewAttribute>
      </calculatedViewAttributes>
    </calculationView>
  </calculationViews>
</Calculation:scenario>"##;

    #[test]
    fn test_namespace_agnostic_lookup() {
        let root = parse_document(SAMPLE.as_bytes()).unwrap();
        assert_eq!(root.local_name, "scenario");
        assert_eq!(root.name, "Calculation:scenario");
        assert_eq!(root.attr("id"), Some("CV_TEST"));
        assert_eq!(
            root.first(&["descriptions"]).and_then(|d| d.attr("defaultDescription")),
            Some("Test & view")
        );

        let views = root.path(&["calculationViews", "calculationView"]);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].type_name(), "ProjectionView");
        assert_eq!(views[0].first(&["input"]).and_then(|i| i.attr("node")), Some("#T"));
        assert_eq!(
            views[0].text_at(&["calculatedViewAttributes", "calculatedViewAttribute", "formula"]),
            Some("\"A\" < 'x'".to_string())
        );
    }

    #[test]
    fn test_type_attribute_not_confused_with_xsi_type() {
        let root = parse_document(
            br#"<ds xmlns:xsi="x" type="DATA_BASE_TABLE" xsi:type="Calculation:DataSource"/>"#,
        )
        .unwrap();
        assert_eq!(root.attr("type"), Some("DATA_BASE_TABLE"));
        assert_eq!(root.type_name(), "DataSource");
    }

    #[test]
    fn test_malformed_document_reports_element() {
        let err = parse_document(b"<root><child></root>").unwrap_err();
        assert!(matches!(err, TransformationError::ParseError { .. }));
        assert!(parse_document(b"").is_err());
    }

    #[test]
    fn test_descendants() {
        let root = parse_document(b"<a><b><c/></b><c/></a>").unwrap();
        assert_eq!(root.descendants("c").len(), 2);
    }
}
