//! Instance Document Store: an owned, mutable XML tree addressed by XPath
//! paths.
//!
//! Nodes live in a flat arena (`Vec<Node>`) and refer to each other by
//! index, so there are no reference cycles and cloning the whole document
//! (for the reset snapshot) is a plain vector clone. Mutation is limited to
//! text content; structural repeat mutation stays representable through the
//! same addressing scheme but is not performed here.

use log::warn;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ParseError, Result};

/// Index of a node within the document arena
pub type NodeId = usize;

/// One element node. Text content is stored on the element itself; the
/// instance documents this store holds carry values in leaf elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Element name, including any namespace prefix as written
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Merged character data directly inside this element
    pub text: String,
    /// Child elements in document order
    pub children: Vec<NodeId>,
    /// Parent node; `None` only for the synthetic document root
    pub parent: Option<NodeId>,
}

/// A mutable XML tree with path-based get/set and serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Parse an XML fragment into a document. The synthetic root at index 0
    /// holds the top-level element(s) as children.
    pub fn parse(xml: &str) -> Result<Document> {
        let mut nodes = vec![Node {
            name: String::new(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
            parent: None,
        }];
        let mut stack: Vec<NodeId> = vec![0];
        let mut reader = Reader::from_str(xml);

        loop {
            match reader.read_event().map_err(ParseError::xml)? {
                Event::Start(e) => {
                    let id = push_element(&mut nodes, &mut stack, &e)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    push_element(&mut nodes, &mut stack, &e)?;
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(ParseError::xml)?;
                    let top = *stack.last().expect("stack never empty");
                    // Whitespace between elements is formatting, not data.
                    if top != 0 && !text.trim().is_empty() {
                        nodes[top].text.push_str(&text);
                    }
                }
                Event::CData(t) => {
                    let top = *stack.last().expect("stack never empty");
                    if top != 0 {
                        let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                        nodes[top].text.push_str(&text);
                    }
                }
                Event::Eof => break,
                // Declarations, comments, PIs and doctypes carry no data.
                _ => {}
            }
        }
        if stack.len() > 1 {
            return Err(ParseError::Xml {
                message: "unterminated element".into(),
            }
            .into());
        }
        Ok(Document { nodes })
    }

    /// The synthetic document root
    pub fn root(&self) -> NodeId {
        0
    }

    /// The single top-level element, when there is exactly one
    pub fn root_element(&self) -> Option<NodeId> {
        match self.nodes[0].children.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Access a node by id
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of nodes in the arena, synthetic root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the document holds no elements
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Child elements of `id` with the given name
    pub fn children_named<'d>(
        &'d self,
        id: NodeId,
        name: &'d str,
    ) -> impl Iterator<Item = NodeId> + 'd {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(move |&c| self.nodes[c].name == name)
    }

    /// The string-value of a node: its own text plus all descendant text,
    /// in document order.
    pub fn string_value(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            return node.text.clone();
        }
        let mut out = node.text.clone();
        for &child in &node.children {
            out.push_str(&self.string_value(child));
        }
        out
    }

    /// Replace a node's direct text content
    pub fn set_text(&mut self, id: NodeId, value: &str) {
        self.nodes[id].text.clear();
        self.nodes[id].text.push_str(value);
    }

    /// The absolute slash-joined path of a node, e.g. `/data/person/age`
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == 0 {
                break;
            }
            segments.push(self.nodes[n].name.as_str());
            cur = self.nodes[n].parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Read the value at a path. Zero matches yields `None`; more than one
    /// match is a logged ambiguity and the first match (in document order)
    /// is used.
    pub fn get(&self, path: &str) -> Option<String> {
        let nodes = crate::evaluator::select_str(self, path).ok()?;
        match nodes.as_slice() {
            [] => None,
            [only] => Some(self.string_value(*only)),
            [first, ..] => {
                warn!("path '{path}' matches {} nodes, reading the first", nodes.len());
                Some(self.string_value(*first))
            }
        }
    }

    /// Read a value with the XPath string-to-number cast; unparseable or
    /// absent values are `None`.
    pub fn get_number(&self, path: &str) -> Option<f64> {
        let raw = self.get(path)?;
        let n: f64 = raw.trim().parse().ok()?;
        if n.is_nan() {
            None
        } else {
            Some(n)
        }
    }

    /// Read a value with the XPath string-to-boolean cast: empty and
    /// `"false"` are false, numeric values follow numeric truthiness, any
    /// other non-empty string is true.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        let raw = self.get(path)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "false" {
            return Some(false);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Some(n != 0.0 && !n.is_nan());
        }
        Some(true)
    }

    /// Write a value to every node the path matches, returning how many
    /// nodes were written. Multi-node writes are deliberate: ambiguous
    /// paths update all matches, and the count lets callers notice.
    pub fn set(&mut self, path: &str, value: &str) -> usize {
        let nodes = match crate::evaluator::select_str(self, path) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!("cannot resolve '{path}' for write: {err}");
                return 0;
            }
        };
        if nodes.len() > 1 {
            warn!("path '{path}' matches {} nodes, writing all of them", nodes.len());
        }
        for &id in &nodes {
            self.set_text(id, value);
        }
        nodes.len()
    }

    /// Serialize back to XML text with special-character escaping. Markup
    /// equivalent to the parsed input; whitespace between elements is not
    /// preserved.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for &child in &self.nodes[0].children {
            self.write_element(child, &mut out);
        }
        out
    }

    fn write_element(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        out.push('<');
        out.push_str(&node.name);
        for (key, value) in &node.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if node.text.is_empty() && node.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(node.text.as_str()));
        for &child in &node.children {
            self.write_element(child, out);
        }
        out.push_str("</");
        out.push_str(&node.name);
        out.push('>');
    }
}

fn push_element(
    nodes: &mut Vec<Node>,
    stack: &mut [NodeId],
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<NodeId> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(ParseError::xml)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(ParseError::xml)?.into_owned();
        attributes.push((key, value));
    }
    let parent = *stack.last().expect("stack never empty");
    let id = nodes.len();
    nodes.push(Node {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
        parent: Some(parent),
    });
    nodes[parent].children.push(id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RECORD: &str = "<data id=\"f1\"><name>Ada</name><age>17</age>\
                          <pet><name>Rex</name></pet></data>";

    #[test]
    fn parses_and_reads_by_path() {
        let doc = Document::parse(RECORD).unwrap();
        assert_eq!(doc.get("/data/name"), Some("Ada".into()));
        assert_eq!(doc.get_number("/data/age"), Some(17.0));
        assert_eq!(doc.get("/data/pet/name"), Some("Rex".into()));
        assert_eq!(doc.get("/data/missing"), None);
    }

    #[test]
    fn boolean_cast_rules() {
        let doc = Document::parse(
            "<d><empty/><no>false</no><zero>0</zero><yes>anything</yes></d>",
        )
        .unwrap();
        assert_eq!(doc.get_bool("/d/empty"), Some(false));
        assert_eq!(doc.get_bool("/d/no"), Some(false));
        assert_eq!(doc.get_bool("/d/zero"), Some(false));
        assert_eq!(doc.get_bool("/d/yes"), Some(true));
    }

    #[test]
    fn set_writes_and_serializes_escaped() {
        let mut doc = Document::parse("<data><note/></data>").unwrap();
        assert_eq!(doc.set("/data/note", "a < b & c"), 1);
        let xml = doc.serialize();
        assert_eq!(xml, "<data><note>a &lt; b &amp; c</note></data>");
    }

    #[test]
    fn ambiguous_set_writes_every_match() {
        let mut doc =
            Document::parse("<data><item>1</item><item>2</item></data>").unwrap();
        assert_eq!(doc.set("/data/item", "x"), 2);
        let reparsed = Document::parse(&doc.serialize()).unwrap();
        let values: Vec<String> = reparsed
            .children_named(reparsed.root_element().unwrap(), "item")
            .map(|n| reparsed.string_value(n))
            .collect();
        assert_eq!(values, vec!["x", "x"]);
    }

    #[test]
    fn round_trip_preserves_structure() {
        let doc = Document::parse(RECORD).unwrap();
        let reparsed = Document::parse(&doc.serialize()).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        assert!(Document::parse("<data><open></data>").is_err());
    }
}
