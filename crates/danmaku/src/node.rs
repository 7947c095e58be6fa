//! Minimal XML element model for danmu documents.
//!
//! Danmu files are flat: a root element (`<i>`) whose direct children are the
//! records and a few metadata elements. Only that first level is kept; the
//! text of deeper descendants is folded into their top-level ancestor.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Result;

/// UTF-8 byte-order mark.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A single top-level XML element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text of the element and its descendants.
    pub text: String,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Get an attribute value by name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or overwrite an attribute, keeping its original position.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }
}

/// A parsed danmu document: root element name plus its direct children.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    pub root: String,
    pub children: Vec<XmlNode>,
}

impl XmlDocument {
    /// Parse a document from raw bytes. A leading UTF-8 BOM is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let source = std::str::from_utf8(bytes)?;
        Self::parse_str(source)
    }

    pub fn parse_str(source: &str) -> Result<Self> {
        let mut reader = Reader::from_str(source);
        let mut document = XmlDocument::default();
        let mut current: Option<XmlNode> = None;
        let mut depth = 0usize;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    match depth {
                        0 => document.root = element_name(&e)?,
                        1 => current = Some(read_node(&e)?),
                        _ => {}
                    }
                    depth += 1;
                }
                Event::Empty(e) => match depth {
                    0 => document.root = element_name(&e)?,
                    1 => document.children.push(read_node(&e)?),
                    _ => {}
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 1
                        && let Some(node) = current.take()
                    {
                        document.children.push(node);
                    }
                }
                Event::Text(t) => {
                    if let Some(node) = current.as_mut() {
                        node.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(node) = current.as_mut() {
                        node.text.push_str(std::str::from_utf8(&c)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(document)
    }

    /// Iterate over the children with the given element name.
    pub fn elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |n| n.name == name)
    }

    /// First child with the given element name.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|n| n.name == name)
    }
}

fn element_name(e: &BytesStart<'_>) -> Result<String> {
    Ok(std::str::from_utf8(e.name().as_ref())?.to_string())
}

fn read_node(e: &BytesStart<'_>) -> Result<XmlNode> {
    let mut node = XmlNode::new(element_name(e)?);
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

/// Escape special XML characters in a string.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl XmlNode {
    /// Serialize this element to a single line of XML.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(64 + self.text.len());
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_xml(value));
            out.push('"');
        }
        if self.text.is_empty() {
            out.push_str(" />");
        } else {
            out.push('>');
            out.push_str(&escape_xml(&self.text));
            out.push_str("</");
            out.push_str(&self.name);
            out.push('>');
        }
        out
    }
}
