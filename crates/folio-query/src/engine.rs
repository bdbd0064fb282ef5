//! Query engine: get, list, search and navigation.

use crate::context::{LocaleSettings, QueryContext, SortDirection, SortKey};
use crate::filter::Filter;
use crate::search::{query_terms, score};
use crate::Result;
use folio_indexer::tree::node_title;
use folio_indexer::{
    ContentNode, ContentStore, MetaValue, NavigationBuilder, NavigationEntry, NodeStatus,
    Pipeline, TransformContext,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node: Arc<ContentNode>,
    pub score: u64,
}

/// Read-only access to the content corpus.
///
/// Every call works on one store snapshot, so results never mix two
/// versions of the corpus.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn ContentStore>,
    pipeline: Arc<Pipeline>,
    navigation: Arc<RwLock<NavigationBuilder>>,
    locales: LocaleSettings,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        pipeline: Arc<Pipeline>,
        navigation: Arc<RwLock<NavigationBuilder>>,
        locales: LocaleSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            navigation,
            locales,
        }
    }

    /// Fetch one node with render-time plugins applied for `ctx.target`.
    ///
    /// A render failure does not fail the call: the unrendered node is
    /// returned marked degraded.
    pub fn get(&self, path: &str, ctx: &QueryContext) -> Result<Arc<ContentNode>> {
        ctx.check_cancelled()?;
        let node = self.store.get(path)?;

        if !self.pipeline.has_render_plugins(ctx.target) {
            return Ok(node);
        }

        let transform = TransformContext::render(path, ctx.target)
            .with_locale(ctx.locale.as_deref());
        match self.pipeline.render(&node, &transform) {
            Ok(rendered) => Ok(Arc::new(rendered)),
            Err(e) => {
                warn!(path = %path, target = %ctx.target, error = %e, "Render failed");
                let mut degraded = node.as_ref().clone();
                degraded.status = NodeStatus::Degraded {
                    reason: e.to_string(),
                };
                Ok(Arc::new(degraded))
            }
        }
    }

    /// Nodes matching `filter`, in navigation order unless `ctx.sort_by` says otherwise.
    pub fn list(&self, filter: &Filter, ctx: &QueryContext) -> Result<Vec<Arc<ContentNode>>> {
        ctx.check_cancelled()?;
        let snapshot = self.store.snapshot();

        let candidates = filter
            .candidates(&snapshot)
            .unwrap_or_else(|| snapshot.iter().cloned().collect());

        let mut nodes: Vec<Arc<ContentNode>> = candidates
            .into_iter()
            .filter(|node| self.locales.matches(&node.path, ctx.locale.as_deref()))
            .filter(|node| filter.matches(node))
            .collect();

        match &ctx.sort_by {
            Some(sort) => {
                nodes.sort_by(|a, b| {
                    let ordering = compare_by_key(a, b, &sort.key);
                    let ordering = match sort.direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    };
                    ordering.then_with(|| a.path.cmp(&b.path))
                });
            }
            None => {
                let rank = self.rank();
                nodes.sort_by(|a, b| compare_by_rank(&rank, a, b));
            }
        }

        debug!(filter = ?filter, count = nodes.len(), "List query");
        Ok(ctx.page(nodes))
    }

    /// Ranked full-text search. An empty query matches nothing.
    pub fn search(&self, text: &str, ctx: &QueryContext) -> Result<Vec<SearchHit>> {
        ctx.check_cancelled()?;
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.store.snapshot();
        let mut hits = Vec::new();
        for node in snapshot.iter() {
            ctx.check_cancelled()?;
            if !self.locales.matches(&node.path, ctx.locale.as_deref()) {
                continue;
            }
            let score = score(node, &terms);
            if score > 0 {
                hits.push(SearchHit {
                    node: node.clone(),
                    score,
                });
            }
        }

        let rank = self.rank();
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| compare_by_rank(&rank, &a.node, &b.node))
        });

        debug!(query = %text, hits = hits.len(), "Search query");
        Ok(ctx.page(hits))
    }

    /// The navigation tree, restricted to `ctx.locale` when locales are configured.
    pub fn navigation(&self, ctx: &QueryContext) -> Result<NavigationEntry> {
        ctx.check_cancelled()?;
        let nav = self.navigation.read();
        let tree = match ctx.locale.as_deref() {
            Some(locale) if self.locales.is_enabled() => {
                nav.tree_filtered(&|path| self.locales.locale_of(path) == Some(locale))
            }
            _ => nav.tree(),
        };
        Ok(tree)
    }

    fn rank(&self) -> Arc<HashMap<String, usize>> {
        self.navigation.read().rank()
    }
}

fn compare_by_rank(
    rank: &HashMap<String, usize>,
    a: &ContentNode,
    b: &ContentNode,
) -> Ordering {
    let ra = rank.get(&a.path).copied().unwrap_or(usize::MAX);
    let rb = rank.get(&b.path).copied().unwrap_or(usize::MAX);
    ra.cmp(&rb).then_with(|| a.path.cmp(&b.path))
}

fn compare_by_key(a: &ContentNode, b: &ContentNode, key: &SortKey) -> Ordering {
    match key {
        SortKey::Path => a.path.cmp(&b.path),
        SortKey::Title => node_title(a).cmp(&node_title(b)),
        SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortKey::Meta(field) => compare_meta(a.meta(field), b.meta(field)),
    }
}

/// Numbers before strings before booleans; a missing value compares greater than any value.
fn compare_meta(a: Option<&MetaValue>, b: Option<&MetaValue>) -> Ordering {
    fn class(value: &MetaValue) -> u8 {
        match value {
            MetaValue::Number(_) => 0,
            MetaValue::String(_) => 1,
            MetaValue::Bool(_) => 2,
            _ => 3,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(MetaValue::Number(x)), Some(MetaValue::Number(y))) => x.total_cmp(y),
        (Some(MetaValue::String(x)), Some(MetaValue::String(y))) => x.cmp(y),
        (Some(MetaValue::Bool(x)), Some(MetaValue::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => class(x).cmp(&class(y)),
    }
}
