//! Content store.
//!
//! The store owns every [`ContentNode`]. Readers take a [`StoreSnapshot`],
//! an immutable view that later writes never touch. State lives in
//! persistent maps, so a snapshot shares structure with the live state and a
//! write only copies the branch it touches.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::node::ContentNode;
use crate::IndexerError;
use async_trait::async_trait;
use im::{HashMap, OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Result of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted { version: u64 },
    Updated { version: u64 },
    /// Same source hash as the stored node; nothing written
    Unchanged { version: u64 },
}

impl PutOutcome {
    /// Version of the node stored after the put.
    pub fn version(&self) -> u64 {
        match self {
            PutOutcome::Inserted { version }
            | PutOutcome::Updated { version }
            | PutOutcome::Unchanged { version } => *version,
        }
    }

    /// Whether the put changed the store.
    pub fn is_write(&self) -> bool {
        !matches!(self, PutOutcome::Unchanged { .. })
    }
}

/// Storage backend for content nodes.
///
/// Writes to one path are serialized; reads never observe a half-applied
/// put.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Backend identifier, as used in configuration.
    fn name(&self) -> &'static str;

    /// Store `node`, assigning its version.
    ///
    /// A node whose `updated_at` is already set is treated as an explicit
    /// version and must advance past the stored one.
    async fn put(&self, node: ContentNode) -> Result<PutOutcome, IndexerError>;

    /// Remove a path. Returns whether it was present.
    async fn delete(&self, path: &str) -> Result<bool, IndexerError>;

    /// Immutable view of the current contents.
    fn snapshot(&self) -> StoreSnapshot;

    fn get(&self, path: &str) -> Result<Arc<ContentNode>, IndexerError> {
        self.snapshot()
            .get(path)
            .ok_or_else(|| IndexerError::NotFound(path.to_string()))
    }

    /// Every node matching `predicate`, in path order.
    fn query_all(&self, predicate: &dyn Fn(&ContentNode) -> bool) -> Vec<Arc<ContentNode>> {
        self.snapshot()
            .iter()
            .filter(|node| predicate(node))
            .cloned()
            .collect()
    }

    fn query_prefix(&self, prefix: &str) -> Vec<Arc<ContentNode>> {
        self.snapshot().prefix(prefix)
    }

    fn query_tag(&self, tag: &str) -> Vec<Arc<ContentNode>> {
        self.snapshot().tag(tag)
    }

    /// Counter bumped by every write.
    fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Indexed store contents. Cloning is constant time.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    nodes: OrdMap<String, Arc<ContentNode>>,
    /// Last version per path, kept across deletes
    versions: HashMap<String, u64>,
    tags: HashMap<String, OrdSet<String>>,
    generation: u64,
}

/// What a put will do, decided before any I/O.
pub(crate) enum Prepared {
    Unchanged(u64),
    Write(ContentNode),
}

impl StoreState {
    /// Assign a version to `node`, or detect that nothing changed.
    pub(crate) fn prepare(&self, mut node: ContentNode) -> Result<Prepared, IndexerError> {
        if let Some(existing) = self.nodes.get(&node.path) {
            if existing.source_hash == node.source_hash {
                return Ok(Prepared::Unchanged(existing.updated_at));
            }
        }

        let current = self.versions.get(&node.path).copied().unwrap_or(0);
        let attempted = if node.updated_at == 0 {
            current.checked_add(1).unwrap_or(current)
        } else {
            node.updated_at
        };
        if attempted <= current {
            return Err(IndexerError::StoreWriteConflict {
                path: node.path,
                current,
                attempted,
            });
        }

        node.updated_at = attempted;
        Ok(Prepared::Write(node))
    }

    /// Install a prepared node.
    pub(crate) fn commit(&mut self, node: ContentNode) -> Result<PutOutcome, IndexerError> {
        let current = self.versions.get(&node.path).copied().unwrap_or(0);
        if node.updated_at <= current {
            return Err(IndexerError::StoreWriteConflict {
                path: node.path,
                current,
                attempted: node.updated_at,
            });
        }

        let version = node.updated_at;
        let path = node.path.clone();
        let previous = self.nodes.insert(path.clone(), Arc::new(node));
        if let Some(previous) = &previous {
            self.untag(previous);
        }
        if let Some(node) = self.nodes.get(&path).cloned() {
            self.tag(&node);
        }
        self.versions.insert(path, version);
        self.generation += 1;

        Ok(match previous {
            Some(_) => PutOutcome::Updated { version },
            None => PutOutcome::Inserted { version },
        })
    }

    /// Install a node loaded from persistent storage, keeping its version.
    pub(crate) fn restore(&mut self, node: ContentNode) {
        let path = node.path.clone();
        let version = node.updated_at;
        if let Some(previous) = self.nodes.insert(path.clone(), Arc::new(node)) {
            self.untag(&previous);
        }
        if let Some(node) = self.nodes.get(&path).cloned() {
            self.tag(&node);
        }
        self.restore_version(path, version);
    }

    /// Raise the recorded version of a path without storing a node.
    pub(crate) fn restore_version(&mut self, path: String, version: u64) {
        let current = self.versions.get(&path).copied().unwrap_or(0);
        if version > current {
            self.versions.insert(path, version);
        }
    }

    /// Last version assigned to a path, stored or deleted.
    pub(crate) fn version(&self, path: &str) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<Arc<ContentNode>> {
        let removed = self.nodes.remove(path)?;
        self.untag(&removed);
        self.generation += 1;
        Some(removed)
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    fn tag(&mut self, node: &ContentNode) {
        for tag in node.tags() {
            self.tags
                .entry(tag)
                .or_insert_with(OrdSet::new)
                .insert(node.path.clone());
        }
    }

    fn untag(&mut self, node: &ContentNode) {
        for tag in node.tags() {
            if let Some(paths) = self.tags.get_mut(&tag) {
                paths.remove(&node.path);
                if paths.is_empty() {
                    self.tags.remove(&tag);
                }
            }
        }
    }
}

/// A consistent, immutable view of the store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    state: StoreState,
}

impl StoreSnapshot {
    pub(crate) fn new(state: StoreState) -> Self {
        Self { state }
    }

    pub fn get(&self, path: &str) -> Option<Arc<ContentNode>> {
        self.state.nodes.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.contains(path)
    }

    /// Nodes in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ContentNode>> {
        self.state.nodes.values()
    }

    /// Nodes whose path starts with `prefix`, in path order.
    pub fn prefix(&self, prefix: &str) -> Vec<Arc<ContentNode>> {
        self.state
            .nodes
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// Nodes carrying `tag` in their `tags` metadata, in path order.
    pub fn tag(&self, tag: &str) -> Vec<Arc<ContentNode>> {
        self.state
            .tags
            .get(tag)
            .map(|paths| paths.iter().filter_map(|p| self.get(p)).collect())
            .unwrap_or_default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.state.nodes.keys().map(String::as_str)
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn len(&self) -> usize {
        self.state.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.nodes.is_empty()
    }
}

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File {
        /// Defaults to the user data directory
        #[serde(default)]
        dir: Option<PathBuf>,
    },
}

/// Open the configured backend.
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn ContentStore>, IndexerError> {
    let store: Arc<dyn ContentStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File { dir } => {
            let dir = dir.clone().unwrap_or_else(FileStore::default_dir);
            Arc::new(FileStore::open(dir).await?)
        }
    };
    info!(backend = store.name(), nodes = store.len(), "Opened content store");
    Ok(store)
}
