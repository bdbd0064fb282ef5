//! Content service: bulk ingestion and the per-path write path.
//!
//! The service owns the source, pipeline, store and navigation. Bulk
//! ingestion runs documents concurrently; after that only the watch
//! coordinator writes, through the crate-private per-path methods.

use crate::{ContentConfig, CoreError};
use folio_indexer::{
    content_hash, open_store, CancellationToken, ContentStore, DocumentSource, IndexerError,
    NavigationBuilder, Pipeline, PutOutcome,
};
use folio_query::{LocaleSettings, QueryEngine};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Notification sent after a batch of writes reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Store generation after the batch
    pub generation: u64,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Summary of a bulk ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub listed: usize,
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub removed: Vec<String>,
    /// Paths that could not be read, with the reason
    pub failed: Vec<(String, String)>,
}

/// What happened to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathOutcome {
    Updated,
    Unchanged,
    /// Vanished before it was read; dropped from the store
    Removed,
    /// Vanished and was never stored
    Missing,
}

/// Owner of the content corpus.
#[derive(Clone)]
pub struct ContentService {
    source: Arc<dyn DocumentSource>,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ContentStore>,
    navigation: Arc<RwLock<NavigationBuilder>>,
    locales: LocaleSettings,
    parallelism: usize,
    reload_tx: broadcast::Sender<ReloadEvent>,
}

impl ContentService {
    /// Assemble a service from its parts.
    ///
    /// Navigation is seeded from whatever the store already holds.
    pub fn new(
        source: Arc<dyn DocumentSource>,
        pipeline: Arc<Pipeline>,
        store: Arc<dyn ContentStore>,
        locales: LocaleSettings,
        parallelism: usize,
    ) -> Self {
        let mut navigation = NavigationBuilder::new();
        for node in store.snapshot().iter() {
            navigation.upsert(node);
        }
        let (reload_tx, _) = broadcast::channel(64);

        Self {
            source,
            pipeline,
            store,
            navigation: Arc::new(RwLock::new(navigation)),
            locales,
            parallelism: parallelism.max(1),
            reload_tx,
        }
    }

    /// Build everything the configuration describes.
    pub async fn open(config: &ContentConfig) -> Result<Self, CoreError> {
        let source = config.source()?;
        let pipeline = config.pipeline()?;
        let store = open_store(&config.store).await?;

        info!(
            root = ?source.root(),
            backend = store.name(),
            stored = store.len(),
            "Content service ready"
        );

        Ok(Self::new(
            Arc::new(source),
            Arc::new(pipeline),
            store,
            config.locales.clone(),
            config.parallelism,
        ))
    }

    /// Read handle over the corpus.
    pub fn query(&self) -> QueryEngine {
        QueryEngine::new(
            self.store.clone(),
            self.pipeline.clone(),
            self.navigation.clone(),
            self.locales.clone(),
        )
    }

    /// Receive a [`ReloadEvent`] after every write batch.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.reload_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub(crate) fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// Ingest every listed document and drop stored paths that are gone.
    ///
    /// Unreadable documents are reported and skipped. Cancellation is
    /// checked before each document; documents already in flight finish.
    pub async fn ingest_all(&self, cancel: &CancellationToken) -> Result<IngestReport, CoreError> {
        let entries = self.source.list().await?;
        let mut report = IngestReport {
            listed: entries.len(),
            ..IngestReport::default()
        };
        let listed: HashSet<String> = entries.iter().map(|e| e.path.clone()).collect();

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        let mut stopped: Option<CoreError> = None;

        for entry in entries {
            if let Err(e) = cancel.check() {
                stopped = Some(e.into());
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    stopped = Some(CoreError::Fatal(format!("ingestion semaphore closed: {e}")));
                    break;
                }
            };

            // Collect finished work so a fatal error stops the walk early.
            while let Some(joined) = tasks.try_join_next() {
                if let Some(e) = record(&mut report, joined) {
                    stopped = Some(e);
                }
            }
            if stopped.is_some() {
                break;
            }

            let service = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = service.ingest_path(&entry.path).await;
                (entry.path, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(e) = record(&mut report, joined) {
                stopped.get_or_insert(e);
            }
        }

        if let Some(e) = stopped {
            self.publish(report.updated.clone(), report.removed.clone());
            return Err(e);
        }

        let stale: Vec<String> = self
            .store
            .snapshot()
            .paths()
            .filter(|p| !listed.contains(*p))
            .map(str::to_string)
            .collect();
        for path in stale {
            if self.remove_document(&path).await? {
                report.removed.push(path);
            }
        }

        report.updated.sort();
        report.removed.sort();
        info!(
            listed = report.listed,
            updated = report.updated.len(),
            unchanged = report.unchanged,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Ingestion complete"
        );
        self.publish(report.updated.clone(), report.removed.clone());
        Ok(report)
    }

    /// Read, transform and store one document.
    ///
    /// A document that vanished before the read, or that the ignore list now
    /// excludes, is removed instead.
    pub(crate) async fn ingest_path(&self, path: &str) -> Result<PathOutcome, IndexerError> {
        if self.source.is_ignored(path) {
            debug!(path = %path, "Document is ignored");
            return self.drop_document(path).await;
        }

        let doc = match self.source.read(path).await {
            Ok(doc) => doc,
            Err(IndexerError::NotFound(_)) => {
                debug!(path = %path, "Document vanished before read");
                return self.drop_document(path).await;
            }
            Err(e) => return Err(e),
        };

        if let Ok(existing) = self.store.get(path) {
            if existing.source_hash == content_hash(&doc.bytes) {
                let mut navigation = self.navigation.write();
                if !navigation.contains(path) {
                    navigation.upsert(&existing);
                }
                return Ok(PathOutcome::Unchanged);
            }
        }

        let node = self.pipeline.process(&doc.path, &doc.bytes, doc.modified);
        let outcome = self.store.put(node).await?;
        if let PutOutcome::Unchanged { .. } = outcome {
            return Ok(PathOutcome::Unchanged);
        }

        let stored = self.store.get(path)?;
        self.navigation.write().upsert(&stored);
        debug!(path = %path, version = outcome.version(), degraded = stored.is_degraded(), "Stored document");
        Ok(PathOutcome::Updated)
    }

    /// Remove a path and, for a directory, every stored path below it.
    pub(crate) async fn remove_path(&self, path: &str) -> Result<Vec<String>, IndexerError> {
        let mut removed = Vec::new();
        if self.remove_document(path).await? {
            removed.push(path.to_string());
        }

        let below: Vec<String> = self
            .store
            .query_prefix(&format!("{}/", path))
            .iter()
            .map(|node| node.path.clone())
            .collect();
        for child in below {
            if self.remove_document(&child).await? {
                removed.push(child);
            }
        }
        Ok(removed)
    }

    /// Bring everything under a directory in line with the source.
    ///
    /// Returns `(updated, removed)`.
    pub(crate) async fn reconcile_dir(
        &self,
        dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), IndexerError> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let listed: Vec<String> = self
            .source
            .list()
            .await?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| p.starts_with(&prefix))
            .collect();

        let mut updated = Vec::new();
        let mut removed = Vec::new();
        for path in &listed {
            cancel.check()?;
            match self.ingest_path(path).await {
                Ok(PathOutcome::Updated) => updated.push(path.clone()),
                Ok(PathOutcome::Removed) => removed.push(path.clone()),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(path = %path, error = %e, "Failed to ingest document"),
            }
        }

        let listed: HashSet<&String> = listed.iter().collect();
        let stale: Vec<String> = self
            .store
            .query_prefix(&prefix)
            .iter()
            .map(|node| node.path.clone())
            .filter(|p| !listed.contains(p))
            .collect();
        for path in stale {
            if self.remove_document(&path).await? {
                removed.push(path);
            }
        }

        Ok((updated, removed))
    }

    /// Re-read ignore files, then reconcile the directory they cover.
    pub(crate) async fn reapply_ignores(
        &self,
        dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), IndexerError> {
        self.source.reload_ignores().await?;
        self.reconcile_dir(dir, cancel).await
    }

    /// Broadcast a reload for a non-empty batch.
    pub(crate) fn publish(&self, updated: Vec<String>, removed: Vec<String>) {
        if updated.is_empty() && removed.is_empty() {
            return;
        }
        let event = ReloadEvent {
            generation: self.store.generation(),
            updated,
            removed,
        };
        debug!(
            generation = event.generation,
            updated = event.updated.len(),
            removed = event.removed.len(),
            "Publishing reload"
        );
        // No subscribers is fine.
        let _ = self.reload_tx.send(event);
    }

    async fn drop_document(&self, path: &str) -> Result<PathOutcome, IndexerError> {
        Ok(if self.remove_document(path).await? {
            PathOutcome::Removed
        } else {
            PathOutcome::Missing
        })
    }

    async fn remove_document(&self, path: &str) -> Result<bool, IndexerError> {
        let removed = self.store.delete(path).await?;
        self.navigation.write().remove(path);
        if removed {
            debug!(path = %path, "Removed document");
        }
        Ok(removed)
    }
}

/// Fold one finished task into the report. Returns an error that must stop ingestion.
fn record(
    report: &mut IngestReport,
    joined: Result<(String, Result<PathOutcome, IndexerError>), tokio::task::JoinError>,
) -> Option<CoreError> {
    match joined {
        Ok((path, Ok(outcome))) => {
            match outcome {
                PathOutcome::Updated => report.updated.push(path),
                PathOutcome::Unchanged => report.unchanged += 1,
                PathOutcome::Removed => report.removed.push(path),
                PathOutcome::Missing => {}
            }
            None
        }
        Ok((path, Err(e))) if e.is_fatal() => {
            error!(path = %path, error = %e, "Stopping ingestion");
            Some(e.into())
        }
        Ok((path, Err(e))) => {
            warn!(path = %path, error = %e, "Failed to ingest document");
            report.failed.push((path, e.to_string()));
            None
        }
        Err(e) => Some(CoreError::Fatal(format!("ingestion task failed: {e}"))),
    }
}
