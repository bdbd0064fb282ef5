//! List filters over path and metadata.

use folio_indexer::{ContentNode, MetaValue, StoreSnapshot};
use std::fmt;
use std::sync::Arc;

/// Caller-supplied predicate.
pub type Predicate = Arc<dyn Fn(&ContentNode) -> bool + Send + Sync>;

/// A predicate over stored nodes.
///
/// `PathPrefix` and `Tag` are answered from the store indexes when they
/// appear at the top level or inside an `And`.
#[derive(Clone)]
pub enum Filter {
    All,
    PathPrefix(String),
    Tag(String),
    /// Metadata field equals the value (or, for arrays, contains it)
    Eq(String, MetaValue),
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Custom(Predicate),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "All"),
            Filter::PathPrefix(p) => f.debug_tuple("PathPrefix").field(p).finish(),
            Filter::Tag(t) => f.debug_tuple("Tag").field(t).finish(),
            Filter::Eq(k, v) => f.debug_tuple("Eq").field(k).field(v).finish(),
            Filter::Exists(k) => f.debug_tuple("Exists").field(k).finish(),
            Filter::And(items) => f.debug_tuple("And").field(items).finish(),
            Filter::Or(items) => f.debug_tuple("Or").field(items).finish(),
            Filter::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Filter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Filter {
    pub fn custom(predicate: impl Fn(&ContentNode) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(Arc::new(predicate))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut items) => {
                items.push(other);
                Filter::And(items)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut items) => {
                items.push(other);
                Filter::Or(items)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, node: &ContentNode) -> bool {
        match self {
            Filter::All => true,
            Filter::PathPrefix(prefix) => node.path.starts_with(prefix.as_str()),
            Filter::Tag(tag) => node.tags().iter().any(|t| t == tag),
            Filter::Eq(key, expected) => match node.meta(key) {
                Some(MetaValue::Array(items)) if !matches!(expected, MetaValue::Array(_)) => {
                    items.contains(expected)
                }
                Some(value) => value == expected,
                None => false,
            },
            Filter::Exists(key) => node.meta(key).is_some(),
            Filter::And(items) => items.iter().all(|f| f.matches(node)),
            Filter::Or(items) => items.iter().any(|f| f.matches(node)),
            Filter::Not(inner) => !inner.matches(node),
            Filter::Custom(predicate) => predicate(node),
        }
    }

    /// Narrow the candidate set using the store indexes, when possible.
    pub(crate) fn candidates(&self, snapshot: &StoreSnapshot) -> Option<Vec<Arc<ContentNode>>> {
        match self {
            Filter::PathPrefix(prefix) => Some(snapshot.prefix(prefix)),
            Filter::Tag(tag) => Some(snapshot.tag(tag)),
            Filter::And(items) => items.iter().find_map(|f| f.candidates(snapshot)),
            _ => None,
        }
    }
}
