//! Incremental navigation builder.

use super::{node_order, node_title, segment_order, segment_title, NavOrder, NavigationEntry};
use crate::node::ContentNode;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

const INDEX_STEMS: [&str; 2] = ["index.md", "index.markdown"];

/// Derived navigation data for one document.
#[derive(Debug, Clone, PartialEq)]
struct DocRecord {
    title: String,
    order: NavOrder,
    version: u64,
}

/// Position of an entry among its siblings: order class, order value, path.
#[derive(Debug, Clone)]
struct SiblingKey {
    order: NavOrder,
    path: String,
    directory: bool,
}

impl PartialEq for SiblingKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SiblingKey {}

impl PartialOrd for SiblingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SiblingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(&other.order)
            .then_with(|| self.path.cmp(&other.path))
            .then_with(|| self.directory.cmp(&other.directory))
    }
}

/// Keeps navigation records grouped by directory, each group kept sorted.
///
/// Updates touch only the sibling group of the changed path and, when a
/// directory appears, empties or changes its `index.md`, the parent group.
#[derive(Debug, Default)]
pub struct NavigationBuilder {
    docs: HashMap<String, DocRecord>,
    /// Directory -> sorted documents and subdirectories ("" is the root)
    groups: BTreeMap<String, BTreeSet<SiblingKey>>,
    /// Directory -> its key in the parent group
    dirs: HashMap<String, SiblingKey>,
    /// Depth-first ranks, dropped whenever an order changes
    ranks: Mutex<Option<Arc<HashMap<String, usize>>>>,
}

impl NavigationBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents tracked.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.docs.contains_key(path)
    }

    /// Insert or refresh a document. Returns false for stale versions.
    pub fn upsert(&mut self, node: &ContentNode) -> bool {
        let previous = self.docs.get(&node.path).cloned();
        if let Some(existing) = &previous {
            if existing.version >= node.updated_at {
                debug!(
                    path = %node.path,
                    current = existing.version,
                    attempted = node.updated_at,
                    "Ignoring stale navigation update"
                );
                return false;
            }
        }

        let record = DocRecord {
            title: node_title(node),
            order: node_order(node),
            version: node.updated_at,
        };
        let dir = parent_dir(&node.path).to_string();
        let moved = previous.as_ref().map(|p| p.order != record.order).unwrap_or(true);

        if moved {
            self.ensure_dir(&dir);
            let group = self.groups.entry(dir.clone()).or_default();
            if let Some(previous) = &previous {
                group.remove(&doc_key(&node.path, &previous.order));
            }
            group.insert(doc_key(&node.path, &record.order));
            self.invalidate_ranks();
        }
        self.docs.insert(node.path.clone(), record);

        if is_index(&node.path) {
            self.refresh_dir_key(&dir);
        }
        true
    }

    /// Remove a document, pruning directories left empty.
    pub fn remove(&mut self, path: &str) -> bool {
        let Some(record) = self.docs.remove(path) else {
            return false;
        };

        let mut dir = parent_dir(path).to_string();
        if let Some(group) = self.groups.get_mut(&dir) {
            group.remove(&doc_key(path, &record.order));
        }
        if is_index(path) {
            self.refresh_dir_key(&dir);
        }

        // Prune upwards while directories are empty.
        while !dir.is_empty() && self.groups.get(&dir).map(|g| g.is_empty()).unwrap_or(true) {
            self.groups.remove(&dir);
            let parent = parent_dir(&dir).to_string();
            if let Some(key) = self.dirs.remove(&dir) {
                if let Some(siblings) = self.groups.get_mut(&parent) {
                    siblings.remove(&key);
                }
            }
            dir = parent;
        }
        self.invalidate_ranks();
        true
    }

    /// Materialize the full tree.
    pub fn tree(&self) -> NavigationEntry {
        self.tree_filtered(&|_| true)
    }

    /// Materialize the tree restricted to documents accepted by `include`.
    /// Directories without included documents are dropped.
    pub fn tree_filtered(&self, include: &dyn Fn(&str) -> bool) -> NavigationEntry {
        self.dir_entry("", include)
    }

    /// Depth-first position of every document in the navigation tree.
    ///
    /// Computed once per change and shared until the next one.
    pub fn rank(&self) -> Arc<HashMap<String, usize>> {
        let mut cached = self.ranks.lock();
        if let Some(ranks) = cached.as_ref() {
            return ranks.clone();
        }

        let mut ranks = HashMap::with_capacity(self.docs.len());
        self.collect_ranks("", &mut ranks);
        let ranks = Arc::new(ranks);
        *cached = Some(ranks.clone());
        ranks
    }

    fn collect_ranks(&self, dir: &str, ranks: &mut HashMap<String, usize>) {
        let Some(group) = self.groups.get(dir) else {
            return;
        };
        for key in group {
            if key.directory {
                self.collect_ranks(&key.path, ranks);
            } else {
                let next = ranks.len();
                ranks.insert(key.path.clone(), next);
            }
        }
    }

    fn invalidate_ranks(&self) {
        *self.ranks.lock() = None;
    }

    /// Register `dir` and any missing ancestors in their parent groups.
    fn ensure_dir(&mut self, dir: &str) {
        let mut current = dir.to_string();
        while !current.is_empty() && !self.dirs.contains_key(&current) {
            let parent = parent_dir(&current).to_string();
            let key = self.dir_key(&current);
            self.groups
                .entry(parent.clone())
                .or_default()
                .insert(key.clone());
            self.dirs.insert(current, key);
            current = parent;
        }
    }

    /// Re-sort `dir` in its parent after its index document changed.
    fn refresh_dir_key(&mut self, dir: &str) {
        let Some(old) = self.dirs.get(dir).cloned() else {
            return;
        };
        let key = self.dir_key(dir);
        if key.order.compare(&old.order) == Ordering::Equal {
            return;
        }

        let group = self.groups.entry(parent_dir(dir).to_string()).or_default();
        group.remove(&old);
        group.insert(key.clone());
        self.dirs.insert(dir.to_string(), key);
        self.invalidate_ranks();
    }

    fn dir_key(&self, dir: &str) -> SiblingKey {
        let order = match self.index_record(dir) {
            Some(index) => index.order.clone(),
            None => segment_order(segment_of(dir)),
        };
        SiblingKey {
            order,
            path: dir.to_string(),
            directory: true,
        }
    }

    fn index_record(&self, dir: &str) -> Option<&DocRecord> {
        INDEX_STEMS.iter().find_map(|stem| {
            let path = if dir.is_empty() {
                stem.to_string()
            } else {
                format!("{}/{}", dir, stem)
            };
            self.docs.get(&path)
        })
    }

    fn dir_entry(&self, dir: &str, include: &dyn Fn(&str) -> bool) -> NavigationEntry {
        let mut children = Vec::new();

        for key in self.groups.get(dir).into_iter().flatten() {
            if key.directory {
                let entry = self.dir_entry(&key.path, include);
                if !entry.children.is_empty() {
                    children.push(entry);
                }
            } else if include(&key.path) {
                if let Some(record) = self.docs.get(&key.path) {
                    children.push(NavigationEntry {
                        path: key.path.clone(),
                        title: record.title.clone(),
                        order: record.order.clone(),
                        directory: false,
                        children: Vec::new(),
                    });
                }
            }
        }

        let (title, order) = match self.index_record(dir) {
            Some(index) => (index.title.clone(), index.order.clone()),
            None if dir.is_empty() => (String::new(), NavOrder::Unset),
            None => (segment_title(segment_of(dir)), segment_order(segment_of(dir))),
        };

        NavigationEntry {
            path: dir.to_string(),
            title,
            order,
            directory: true,
            children,
        }
    }
}

fn doc_key(path: &str, order: &NavOrder) -> SiblingKey {
    SiblingKey {
        order: order.clone(),
        path: path.to_string(),
        directory: false,
    }
}

fn is_index(path: &str) -> bool {
    INDEX_STEMS.contains(&segment_of(path))
}

fn segment_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory of a logical path ("" for top-level entries).
fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}
