//! Navigation tree.
//!
//! The tree mirrors the directory hierarchy of the content root. Every
//! stored document appears exactly once as a leaf; directories become
//! branch entries that borrow the title and order of their `index.md`.

mod builder;

pub use builder::NavigationBuilder;

use crate::node::{ContentNode, MetaValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sort position of an entry among its siblings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum NavOrder {
    Number(f64),
    Text(String),
    #[default]
    Unset,
}

impl NavOrder {
    fn class(&self) -> u8 {
        match self {
            NavOrder::Number(_) => 0,
            NavOrder::Text(_) => 1,
            NavOrder::Unset => 2,
        }
    }

    /// Numbers first, then text, then unordered entries.
    pub fn compare(&self, other: &NavOrder) -> Ordering {
        match (self, other) {
            (NavOrder::Number(a), NavOrder::Number(b)) => a.total_cmp(b),
            (NavOrder::Text(a), NavOrder::Text(b)) => a.cmp(b),
            _ => self.class().cmp(&other.class()),
        }
    }

    fn from_meta(value: &MetaValue) -> Option<NavOrder> {
        match value {
            MetaValue::Number(n) => Some(NavOrder::Number(*n)),
            MetaValue::String(s) => Some(
                s.trim()
                    .parse::<f64>()
                    .map(NavOrder::Number)
                    .unwrap_or_else(|_| NavOrder::Text(s.clone())),
            ),
            _ => None,
        }
    }
}

/// One entry of the navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEntry {
    /// Logical path of the document, or of the directory for branches
    pub path: String,
    pub title: String,
    pub order: NavOrder,
    pub directory: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavigationEntry>,
}

impl NavigationEntry {
    /// Find an entry by path.
    pub fn find(&self, path: &str) -> Option<&NavigationEntry> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    /// Document paths in depth-first navigation order.
    pub fn document_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_documents(&mut out);
        out
    }

    fn collect_documents<'a>(&'a self, out: &mut Vec<&'a str>) {
        if !self.directory {
            out.push(&self.path);
        }
        for child in &self.children {
            child.collect_documents(out);
        }
    }
}

/// Navigation title of a node: `title` metadata, else derived from the path.
pub fn node_title(node: &ContentNode) -> String {
    node.title()
        .map(str::to_string)
        .unwrap_or_else(|| segment_title(last_segment(&node.path)))
}

/// Navigation order of a node: `order`, then `position`, then a numeric
/// filename prefix.
pub fn node_order(node: &ContentNode) -> NavOrder {
    node.meta("order")
        .and_then(NavOrder::from_meta)
        .or_else(|| node.meta("position").and_then(NavOrder::from_meta))
        .unwrap_or_else(|| segment_order(last_segment(&node.path)))
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Split `1.getting-started.md` into `(Some(1), "getting-started")`.
fn split_segment(segment: &str) -> (Option<f64>, &str) {
    let stem = segment
        .strip_suffix(".md")
        .or_else(|| segment.strip_suffix(".markdown"))
        .unwrap_or(segment);

    if let Some((prefix, rest)) = stem.split_once('.') {
        if !prefix.is_empty() && !rest.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = prefix.parse::<f64>() {
                return (Some(n), rest);
            }
        }
    }
    (None, stem)
}

/// Title-cased words of a path segment.
pub fn segment_title(segment: &str) -> String {
    let (_, name) = split_segment(segment);
    name.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn segment_order(segment: &str) -> NavOrder {
    match split_segment(segment) {
        (Some(n), _) => NavOrder::Number(n),
        (None, _) => NavOrder::Unset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_title() {
        assert_eq!(segment_title("getting-started.md"), "Getting Started");
        assert_eq!(segment_title("2.api_reference.md"), "Api Reference");
        assert_eq!(segment_title("docs"), "Docs");
        assert_eq!(segment_title("v1.2.md"), "V1.2");
    }

    #[test]
    fn test_order_sources() {
        let mut node = ContentNode::new("docs/3.intro.md", "h");
        assert_eq!(node_order(&node), NavOrder::Number(3.0));

        node.raw_metadata
            .insert("position".to_string(), MetaValue::from("b"));
        assert_eq!(node_order(&node), NavOrder::Text("b".to_string()));

        node.raw_metadata
            .insert("order".to_string(), MetaValue::Number(1.0));
        assert_eq!(node_order(&node), NavOrder::Number(1.0));

        let plain = ContentNode::new("docs/intro.md", "h");
        assert_eq!(node_order(&plain), NavOrder::Unset);
    }

    #[test]
    fn test_order_compare() {
        let one = NavOrder::Number(1.0);
        let two = NavOrder::Number(2.0);
        let text = NavOrder::Text("a".to_string());

        assert_eq!(one.compare(&two), Ordering::Less);
        assert_eq!(two.compare(&text), Ordering::Less);
        assert_eq!(text.compare(&NavOrder::Unset), Ordering::Less);
        assert_eq!(NavOrder::Unset.compare(&NavOrder::Unset), Ordering::Equal);
    }

    #[test]
    fn test_node_title_prefers_metadata() {
        let mut node = ContentNode::new("docs/1.setup.md", "h");
        assert_eq!(node_title(&node), "Setup");

        node.raw_metadata
            .insert("title".to_string(), MetaValue::from("Install"));
        assert_eq!(node_title(&node), "Install");
    }
}
