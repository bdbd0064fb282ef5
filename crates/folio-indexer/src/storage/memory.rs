//! In-memory store.

use super::{ContentStore, Prepared, PutOutcome, StoreSnapshot, StoreState};
use crate::node::ContentNode;
use crate::IndexerError;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

/// Default store: everything lives in one indexed map.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, node: ContentNode) -> Result<PutOutcome, IndexerError> {
        let path = node.path.clone();
        // Prepare and commit under one write lock so puts to a path serialize.
        let mut guard = self.state.write();
        let outcome = match guard.prepare(node)? {
            Prepared::Unchanged(version) => PutOutcome::Unchanged { version },
            Prepared::Write(node) => guard.commit(node)?,
        };
        drop(guard);

        debug!(path = %path, outcome = ?outcome, "Put node");
        Ok(outcome)
    }

    async fn delete(&self, path: &str) -> Result<bool, IndexerError> {
        let mut guard = self.state.write();
        if !guard.contains(path) {
            return Ok(false);
        }
        let removed = guard.remove(path).is_some();
        drop(guard);

        debug!(path = %path, "Deleted node");
        Ok(removed)
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(self.state.read().clone())
    }
}
