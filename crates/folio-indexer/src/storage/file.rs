//! Persistent store: one MessagePack file per node.
//!
//! A deleted path leaves a tombstone holding its last version, so versions
//! keep increasing across deletes and restarts.

use super::{ContentStore, Prepared, PutOutcome, StoreSnapshot, StoreState};
use crate::node::ContentNode;
use crate::IndexerError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const NODE_EXTENSION: &str = "msgpack";
const TOMBSTONE_EXTENSION: &str = "tombstone";

/// Last version of a deleted path.
#[derive(Debug, Serialize, Deserialize)]
struct Tombstone {
    path: String,
    version: u64,
}

type PathLock = Arc<tokio::sync::Mutex<()>>;

/// Write-through store backed by a directory.
///
/// Reads are served from memory; every write lands on disk (temp file then
/// rename) before it becomes visible.
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    /// Held only while a write to that path is running or waiting
    locks: Mutex<HashMap<String, PathLock>>,
}

impl FileStore {
    /// Open (or create) a store directory and load every node in it.
    pub async fn open(dir: PathBuf) -> Result<Self, IndexerError> {
        tokio::fs::create_dir_all(&dir).await?;

        let mut nodes = Vec::new();
        let mut tombstones: HashMap<String, (u64, PathBuf)> = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            // Leftover from an interrupted write
            if name.starts_with('.') && name.ends_with(".tmp") {
                remove_leftover(&path).await;
                continue;
            }

            match path.extension().and_then(|e| e.to_str()) {
                Some(NODE_EXTENSION) => {
                    let data = tokio::fs::read(&path).await?;
                    match rmp_serde::from_slice::<ContentNode>(&data) {
                        Ok(node) => nodes.push((node, path)),
                        Err(e) => {
                            warn!(file = ?path, error = %e, "Skipping unreadable node file");
                        }
                    }
                }
                Some(TOMBSTONE_EXTENSION) => {
                    let data = tokio::fs::read(&path).await?;
                    match rmp_serde::from_slice::<Tombstone>(&data) {
                        Ok(t) => {
                            tombstones.insert(t.path, (t.version, path));
                        }
                        Err(e) => {
                            warn!(file = ?path, error = %e, "Skipping unreadable tombstone");
                        }
                    }
                }
                _ => {}
            }
        }

        let mut state = StoreState::default();
        let mut loaded = 0usize;
        for (node, file) in nodes {
            // A delete interrupted between tombstone and removal.
            if let Some((version, _)) = tombstones.get(&node.path) {
                if *version >= node.updated_at {
                    debug!(path = %node.path, "Dropping node covered by tombstone");
                    remove_leftover(&file).await;
                    continue;
                }
            }
            state.restore(node);
            loaded += 1;
        }
        for (path, (version, _)) in tombstones.iter() {
            state.restore_version(path.clone(), *version);
        }

        info!(
            dir = ?dir,
            nodes = loaded,
            tombstones = tombstones.len(),
            "Loaded file store"
        );

        Ok(Self {
            dir,
            state: RwLock::new(state),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// `<data dir>/folio/store`.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("store")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name stem for a logical path.
    fn path_hash(path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    fn node_file(&self, path: &str) -> PathBuf {
        self.file(path, NODE_EXTENSION)
    }

    fn tombstone_file(&self, path: &str) -> PathBuf {
        self.file(path, TOMBSTONE_EXTENSION)
    }

    fn file(&self, path: &str, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::path_hash(path), extension))
    }

    fn path_lock(&self, path: &str) -> PathLock {
        self.locks
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock for `path` unless another writer holds or awaits it.
    fn release_lock(&self, path: &str, lock: PathLock) {
        let mut locks = self.locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(path);
        }
    }

    /// Write `data` to `target` through a temp file and a rename.
    async fn write_atomic(&self, path: &str, target: &Path, data: &[u8]) -> Result<(), IndexerError> {
        let temp = self
            .dir
            .join(format!(".{}.tmp", Self::path_hash(path)));

        tokio::fs::write(&temp, data).await?;
        tokio::fs::rename(&temp, target).await?;
        Ok(())
    }

    async fn put_locked(&self, node: ContentNode) -> Result<PutOutcome, IndexerError> {
        let prepared = {
            let state = self.state.read();
            state.prepare(node)?
        };
        let node = match prepared {
            Prepared::Unchanged(version) => return Ok(PutOutcome::Unchanged { version }),
            Prepared::Write(node) => node,
        };

        let data = rmp_serde::to_vec_named(&node)?;
        let target = self.node_file(&node.path);
        self.write_atomic(&node.path, &target, &data).await?;
        debug!(path = %node.path, file = ?target, size = data.len(), "Wrote node");

        // The node file now carries the newest version.
        match tokio::fs::remove_file(self.tombstone_file(&node.path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %node.path, error = %e, "Failed to remove tombstone"),
        }

        self.state.write().commit(node)
    }

    async fn delete_locked(&self, path: &str) -> Result<bool, IndexerError> {
        let version = {
            let state = self.state.read();
            if !state.contains(path) {
                return Ok(false);
            }
            state.version(path)
        };

        let tombstone = rmp_serde::to_vec_named(&Tombstone {
            path: path.to_string(),
            version,
        })?;
        self.write_atomic(path, &self.tombstone_file(path), &tombstone)
            .await?;

        match tokio::fs::remove_file(self.node_file(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IndexerError::Storage(format!("{}: {}", path, e))),
        }

        let removed = self.state.write().remove(path).is_some();
        debug!(path = %path, version, "Deleted node file");
        Ok(removed)
    }
}

async fn remove_leftover(file: &Path) {
    if let Err(e) = tokio::fs::remove_file(file).await {
        debug!(file = ?file, error = %e, "Failed to remove leftover file");
    }
}

#[async_trait]
impl ContentStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(&self, node: ContentNode) -> Result<PutOutcome, IndexerError> {
        let path = node.path.clone();
        let lock = self.path_lock(&path);
        let result = {
            let _guard = lock.lock().await;
            self.put_locked(node).await
        };
        self.release_lock(&path, lock);
        result
    }

    async fn delete(&self, path: &str) -> Result<bool, IndexerError> {
        let lock = self.path_lock(path);
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(path).await
        };
        self.release_lock(path, lock);
        result
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(self.state.read().clone())
    }
}
