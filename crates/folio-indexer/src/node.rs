//! Content node data model.
//!
//! A [`ContentNode`] is the normalized, queryable form of one source
//! document: its front matter, a structured body tree and the fields the
//! parse-time plugins derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Front matter as parsed from a document.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A permissively typed front matter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Borrow as a string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a number, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the value as a boolean, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Flatten every string leaf (arrays and maps included) into `out`.
    pub fn collect_strings<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            MetaValue::String(s) => out.push(s),
            MetaValue::Array(items) => items.iter().for_each(|v| v.collect_strings(out)),
            MetaValue::Map(map) => map.values().for_each(|v| v.collect_strings(out)),
            _ => {}
        }
    }

    /// Values of a `tags`-like field: a single string or an array of strings.
    pub fn as_tags(&self) -> Vec<String> {
        match self {
            MetaValue::String(s) => vec![s.clone()],
            MetaValue::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::String(s.to_string())
    }
}

impl From<f64> for MetaValue {
    fn from(n: f64) -> Self {
        MetaValue::Number(n)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// A node in the document body tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BodyNode {
    Element(Element),
    Text { value: String },
}

impl BodyNode {
    /// Create a text node.
    pub fn text(value: impl Into<String>) -> Self {
        BodyNode::Text {
            value: value.into(),
        }
    }

    /// Append the plain text of this node to `out`.
    fn write_text(&self, out: &mut String) {
        match self {
            BodyNode::Text { value } => out.push_str(value),
            BodyNode::Element(el) => {
                for child in &el.children {
                    child.write_text(out);
                }
                if el.is_block() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
    }
}

/// A tagged element with string props, mirroring an HTML-like tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BodyNode>,
}

impl Element {
    /// Create an empty element.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style prop setter.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: BodyNode) -> Self {
        self.children.push(child);
        self
    }

    /// Heading level for `h1`..`h6`.
    pub fn heading_level(&self) -> Option<u8> {
        let level = self.tag.strip_prefix('h')?.parse::<u8>().ok()?;
        (1..=6).contains(&level).then_some(level)
    }

    /// Plain text of all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_text(&mut out);
        }
        out.trim().to_string()
    }

    fn is_block(&self) -> bool {
        matches!(
            self.tag.as_str(),
            "p" | "h1"
                | "h2"
                | "h3"
                | "h4"
                | "h5"
                | "h6"
                | "li"
                | "pre"
                | "blockquote"
                | "tr"
                | "hr"
        )
    }
}

/// The structured body of a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Body {
    pub children: Vec<BodyNode>,
}

impl Body {
    /// A body holding the unparsed text as a single text node.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            children: vec![BodyNode::text(text)],
        }
    }

    /// Plain text with block elements separated by newlines.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_text(&mut out);
        }
        out
    }

    /// Visit every element depth-first, with its element nesting depth.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element, usize)) {
        fn visit(nodes: &mut [BodyNode], depth: usize, f: &mut dyn FnMut(&mut Element, usize)) {
            for node in nodes {
                if let BodyNode::Element(el) = node {
                    f(el, depth);
                    visit(&mut el.children, depth + 1, f);
                }
            }
        }
        visit(&mut self.children, 0, f);
    }

    /// Fallible variant of [`Body::walk_mut`]; stops at the first error.
    pub fn try_walk_mut<E>(
        &mut self,
        f: &mut dyn FnMut(&mut Element, usize) -> Result<(), E>,
    ) -> Result<(), E> {
        fn visit<E>(
            nodes: &mut [BodyNode],
            depth: usize,
            f: &mut dyn FnMut(&mut Element, usize) -> Result<(), E>,
        ) -> Result<(), E> {
            for node in nodes {
                if let BodyNode::Element(el) = node {
                    f(el, depth)?;
                    visit(&mut el.children, depth + 1, f)?;
                }
            }
            Ok(())
        }
        visit(&mut self.children, 0, f)
    }
}

/// A heading found in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// Anchor id
    pub id: String,
    /// Heading level (1-6)
    pub depth: u8,
    /// Heading text
    pub text: String,
    /// Number of enclosing elements (0 for top-level headings)
    pub nesting: usize,
}

/// A table of contents entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: String,
    pub depth: u8,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

/// Table of contents computed from headings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Toc {
    /// Deepest heading level included
    pub depth: u8,
    /// Deepest element nesting searched for headings
    pub search_depth: usize,
    pub links: Vec<TocEntry>,
}

/// Estimated reading time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadingTime {
    pub words: usize,
    pub minutes: usize,
}

/// A resolved link to another document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRef {
    /// Link as authored
    pub href: String,
    /// Logical path of the target document
    pub target: String,
}

/// Fields derived by parse-time plugins. Never authored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputedFields {
    pub toc: Option<Toc>,
    #[serde(default)]
    pub headings: Vec<Heading>,
    pub reading_time: Option<ReadingTime>,
    #[serde(default)]
    pub links: Vec<CrossRef>,
}

impl ComputedFields {
    /// True when no plugin contributed anything.
    pub fn is_empty(&self) -> bool {
        self.toc.is_none()
            && self.headings.is_empty()
            && self.reading_time.is_none()
            && self.links.is_empty()
    }
}

/// Health of a stored node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Ok,
    /// Stored with raw body and no computed fields
    Degraded { reason: String },
}

/// The canonical, queryable unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Logical path relative to the content root, slash separated
    pub path: String,
    /// Front matter
    pub raw_metadata: Metadata,
    /// Structured body
    pub body: Body,
    /// Derived fields
    pub computed_fields: ComputedFields,
    /// SHA-256 of the source bytes
    pub source_hash: String,
    /// Per-path version, assigned by the store
    pub updated_at: u64,
    /// Source modification time
    pub modified: DateTime<Utc>,
    pub status: NodeStatus,
}

impl ContentNode {
    /// Create a node that has not been stored yet (`updated_at == 0`).
    pub fn new(path: impl Into<String>, source_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw_metadata: Metadata::new(),
            body: Body::default(),
            computed_fields: ComputedFields::default(),
            source_hash: source_hash.into(),
            updated_at: 0,
            modified: Utc::now(),
            status: NodeStatus::Ok,
        }
    }

    /// Turn this node into its degraded form: raw body, nothing computed.
    pub fn degrade(&mut self, raw_body: &str, reason: impl Into<String>) {
        self.body = Body::raw(raw_body);
        self.computed_fields = ComputedFields::default();
        self.status = NodeStatus::Degraded {
            reason: reason.into(),
        };
    }

    /// Whether the node was stored degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, NodeStatus::Degraded { .. })
    }

    /// Metadata lookup.
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.raw_metadata.get(key)
    }

    /// The `title` metadata string, if any.
    pub fn title(&self) -> Option<&str> {
        self.meta("title").and_then(MetaValue::as_str)
    }

    /// Values of the `tags` metadata field.
    pub fn tags(&self) -> Vec<String> {
        self.meta("tags").map(MetaValue::as_tags).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_separates_blocks() {
        let body = Body {
            children: vec![
                BodyNode::Element(Element::new("h1").with_child(BodyNode::text("Title"))),
                BodyNode::Element(
                    Element::new("p")
                        .with_child(BodyNode::text("Hello "))
                        .with_child(BodyNode::Element(
                            Element::new("strong").with_child(BodyNode::text("world")),
                        )),
                ),
            ],
        };

        assert_eq!(body.plain_text(), "Title\nHello world\n");
    }

    #[test]
    fn test_heading_level() {
        assert_eq!(Element::new("h2").heading_level(), Some(2));
        assert_eq!(Element::new("h7").heading_level(), None);
        assert_eq!(Element::new("hr").heading_level(), None);
    }

    #[test]
    fn test_degrade_clears_computed_fields() {
        let mut node = ContentNode::new("a.md", "hash");
        node.computed_fields.reading_time = Some(ReadingTime {
            words: 10,
            minutes: 1,
        });

        node.degrade("raw text", "boom");

        assert!(node.is_degraded());
        assert!(node.computed_fields.is_empty());
        assert_eq!(node.body, Body::raw("raw text"));
    }

    #[test]
    fn test_tags_accepts_string_or_array() {
        let mut node = ContentNode::new("a.md", "hash");
        node.raw_metadata
            .insert("tags".to_string(), MetaValue::from("rust"));
        assert_eq!(node.tags(), vec!["rust".to_string()]);

        node.raw_metadata.insert(
            "tags".to_string(),
            MetaValue::Array(vec!["a".into(), "b".into(), MetaValue::Number(1.0)]),
        );
        assert_eq!(node.tags(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_node_serialization() {
        let mut node = ContentNode::new("docs/a.md", "abc");
        node.raw_metadata
            .insert("order".to_string(), MetaValue::Number(2.0));
        node.body = Body::raw("hello");

        let json = serde_json::to_string(&node).unwrap();
        let parsed: ContentNode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node);
    }
}
