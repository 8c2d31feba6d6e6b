//! Parsed-document snapshot handed over by the connector.
//!
//! The core never parses markup. A [`Document`] is whatever the connector
//! produced, flattened into elements in document order.

use serde::{Deserialize, Serialize};

/// Position of an element in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawElement")]
pub struct Element {
    /// Lowercased tag name
    pub node_name: String,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Position in document order; assigned by [`Document::new`]
    #[serde(default)]
    pub index: usize,
}

/// Wire shape of an [`Element`] before normalization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    node_name: String,
    #[serde(default)]
    attributes: Vec<(String, String)>,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    index: usize,
}

impl From<RawElement> for Element {
    fn from(raw: RawElement) -> Self {
        Self {
            node_name: raw.node_name.to_ascii_lowercase(),
            attributes: raw.attributes,
            location: raw.location,
            index: raw.index,
        }
    }
}

impl Element {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            location: None,
            index: 0,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.location = Some(Location { line, column });
        self
    }

    /// First attribute with this name, compared case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Same node in the same document.
    pub fn is_same(&self, other: &Element) -> bool {
        self.index == other.index && self.node_name == other.node_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawDocument")]
pub struct Document {
    elements: Vec<Element>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    elements: Vec<Element>,
}

impl From<RawDocument> for Document {
    fn from(raw: RawDocument) -> Self {
        Document::new(raw.elements)
    }
}

impl Document {
    pub fn new(elements: impl IntoIterator<Item = Element>) -> Self {
        let elements = elements
            .into_iter()
            .enumerate()
            .map(|(index, mut element)| {
                element.index = index;
                element
            })
            .collect();

        Self { elements }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn by_tag<'a>(&'a self, node_name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements
            .iter()
            .filter(move |e| e.node_name.eq_ignore_ascii_case(node_name))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_assigns_indices_in_order() {
        let doc = Document::new([
            Element::new("html"),
            Element::new("LINK").with_attribute("rel", "icon"),
            Element::new("link").with_attribute("rel", "manifest"),
        ]);

        let links: Vec<_> = doc.by_tag("link").collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].index, 1);
        assert_eq!(links[1].attribute("REL"), Some("manifest"));
        assert!(!links[0].is_same(links[1]));
    }

    #[test]
    fn test_deserialized_document_is_normalized() {
        let json = r#"{"elements":[
            {"nodeName":"HEAD"},
            {"nodeName":"LINK","attributes":[["rel","apple-touch-icon"]]},
            {"nodeName":"link","attributes":[["rel","apple-touch-icon"]]}
        ]}"#;

        let doc: Document = serde_json::from_str(json).unwrap();
        let links: Vec<_> = doc.by_tag("link").collect();

        assert_eq!(doc.elements()[0].node_name, "head");
        assert_eq!(links[0].node_name, "link");
        assert_eq!((links[0].index, links[1].index), (1, 2));
        assert!(!links[0].is_same(links[1]));
    }

    #[test]
    fn test_deserialized_element_name_is_lowercased() {
        let element: Element =
            serde_json::from_str(r#"{"nodeName":"IMG","index":4}"#).unwrap();

        assert_eq!(element.node_name, "img");
        assert_eq!(element.index, 4);
    }
}
