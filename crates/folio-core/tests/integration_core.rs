//! Integration tests for the content service and the watch coordinator.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc, Semaphore};

use folio_core::{ContentConfig, ContentService, CoreError, ReloadEvent, WatchCoordinator};
use folio_indexer::{
    Body, CancellationToken, ChangeKind, ComputedFields, ContentNode, ContentStore,
    DocumentSource, FileChange, FileWatcher, FsSource, IndexerError, MemoryStore, NodeStatus,
    PipelineBuilder, PutOutcome, SourceDocument, SourceEntry, StoreBackend, StoreSnapshot,
    WatcherOptions, IGNORE_FILE,
};
use folio_query::{Filter, LocaleSettings, QueryContext};

fn config_for(root: &Path) -> ContentConfig {
    ContentConfig {
        content_dir: root.to_path_buf(),
        debounce_ms: 20,
        parallelism: 2,
        ..ContentConfig::default()
    }
}

fn content_root(base: &Path) -> PathBuf {
    let root = base.join("content");
    std::fs::create_dir_all(&root).unwrap();
    root.canonicalize().unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<ReloadEvent>) -> ReloadEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no reload event")
        .unwrap()
}

fn nav_titles(service: &ContentService) -> Vec<(String, String)> {
    service
        .query()
        .navigation(&QueryContext::new())
        .unwrap()
        .children
        .iter()
        .map(|e| (e.path.clone(), e.title.clone()))
        .collect()
}

/// Navigation follows watched additions and deletions
#[tokio::test]
async fn test_watch_updates_navigation() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::write(root.join("a.md"), "---\ntitle: A\norder: 2\n---\n# A\n").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    service.ingest_all(&CancellationToken::new()).await.unwrap();
    let mut events = service.subscribe();

    let watcher = FileWatcher::new(WatcherOptions::default());
    let changes = watcher.sender();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let coordinator = WatchCoordinator::new(service.clone(), Duration::from_millis(20));
    let handle = tokio::spawn(coordinator.run(watcher, shutdown_rx, CancellationToken::new()));

    std::fs::write(root.join("b.md"), "---\ntitle: B\norder: 1\n---\n# B\n").unwrap();
    changes
        .send(FileChange::new(root.join("b.md"), ChangeKind::Created))
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["b.md"]);
    assert_eq!(
        nav_titles(&service),
        vec![
            ("b.md".to_string(), "B".to_string()),
            ("a.md".to_string(), "A".to_string()),
        ]
    );

    std::fs::remove_file(root.join("a.md")).unwrap();
    changes
        .send(FileChange::new(root.join("a.md"), ChangeKind::Deleted))
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.removed, vec!["a.md"]);
    assert_eq!(
        nav_titles(&service),
        vec![("b.md".to_string(), "B".to_string())]
    );
    assert!(matches!(
        service.query().get("a.md", &QueryContext::new()),
        Err(folio_query::QueryError::NotFound(_))
    ));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

/// Ignored paths never reach the store; bursts coalesce into one reload
#[tokio::test]
async fn test_watch_ignores_and_coalesces() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("guide")).unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    let mut events = service.subscribe();

    let watcher = FileWatcher::new(WatcherOptions::default());
    let changes = watcher.sender();
    let cancel = CancellationToken::new();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let coordinator = WatchCoordinator::new(service.clone(), Duration::from_millis(50));
    let handle = tokio::spawn(coordinator.run(watcher, shutdown_rx, cancel.clone()));

    std::fs::write(root.join("notes.txt"), "not content").unwrap();
    std::fs::write(root.join(".hidden.md"), "# Hidden").unwrap();
    std::fs::write(root.join("guide/one.md"), "# One").unwrap();
    std::fs::write(root.join("guide/two.md"), "# Two").unwrap();

    for name in ["notes.txt", ".hidden.md", "guide/one.md", "guide/one.md", "guide/two.md"] {
        changes
            .send(FileChange::new(root.join(name), ChangeKind::Modified))
            .await
            .unwrap();
    }

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["guide/one.md", "guide/two.md"]);
    assert_eq!(service.store().len(), 2);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

/// Removing a directory removes everything stored below it
#[tokio::test]
async fn test_watch_directory_removal() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("guide/deep")).unwrap();
    std::fs::write(root.join("guide/a.md"), "# A").unwrap();
    std::fs::write(root.join("guide/deep/b.md"), "# B").unwrap();
    std::fs::write(root.join("index.md"), "# Home").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    service.ingest_all(&CancellationToken::new()).await.unwrap();
    let mut events = service.subscribe();

    let watcher = FileWatcher::new(WatcherOptions::default());
    let changes = watcher.sender();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(
        WatchCoordinator::new(service.clone(), Duration::from_millis(20)).run(
            watcher,
            shutdown_rx,
            CancellationToken::new(),
        ),
    );

    std::fs::remove_dir_all(root.join("guide")).unwrap();
    changes
        .send(FileChange::new(root.join("guide"), ChangeKind::Deleted))
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.removed, vec!["guide/a.md", "guide/deep/b.md"]);
    assert_eq!(nav_titles(&service).len(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

/// Wraps a memory store and refuses every write with a version conflict.
struct ConflictStore {
    inner: MemoryStore,
}

#[async_trait]
impl ContentStore for ConflictStore {
    fn name(&self) -> &'static str {
        "conflict"
    }

    async fn put(&self, node: ContentNode) -> Result<PutOutcome, IndexerError> {
        Err(IndexerError::StoreWriteConflict {
            path: node.path,
            current: 1,
            attempted: 1,
        })
    }

    async fn delete(&self, path: &str) -> Result<bool, IndexerError> {
        self.inner.delete(path).await
    }

    fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot()
    }
}

/// A write conflict stops the coordinator with an error
#[tokio::test]
async fn test_write_conflict_stops_coordinator() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    let config = config_for(&root);

    let service = ContentService::new(
        Arc::new(config.source().unwrap()),
        Arc::new(PipelineBuilder::with_defaults().build().unwrap()),
        Arc::new(ConflictStore {
            inner: MemoryStore::new(),
        }),
        LocaleSettings::default(),
        1,
    );

    let watcher = FileWatcher::new(WatcherOptions::default());
    let changes = watcher.sender();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(
        WatchCoordinator::new(service, Duration::from_millis(10)).run(
            watcher,
            shutdown_rx,
            CancellationToken::new(),
        ),
    );

    std::fs::write(root.join("a.md"), "# A").unwrap();
    changes
        .send(FileChange::new(root.join("a.md"), ChangeKind::Created))
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        CoreError::Indexer(IndexerError::StoreWriteConflict { .. })
    ));
}

/// The same fatal error stops bulk ingestion
#[tokio::test]
async fn test_write_conflict_stops_ingestion() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::write(root.join("a.md"), "# A").unwrap();

    let service = ContentService::new(
        Arc::new(config_for(&root).source().unwrap()),
        Arc::new(PipelineBuilder::with_defaults().build().unwrap()),
        Arc::new(ConflictStore {
            inner: MemoryStore::new(),
        }),
        LocaleSettings::default(),
        1,
    );

    let err = service
        .ingest_all(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

/// Re-ingesting an unchanged tree writes nothing
#[tokio::test]
async fn test_idempotent_reingestion() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::write(root.join("a.md"), "# A").unwrap();
    std::fs::write(root.join("b.md"), "# B").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    let cancel = CancellationToken::new();
    service.ingest_all(&cancel).await.unwrap();
    let generation = service.store().generation();
    let before = service.store().get("a.md").unwrap();

    let report = service.ingest_all(&cancel).await.unwrap();
    assert!(report.updated.is_empty());
    assert!(report.removed.is_empty());
    assert_eq!(report.unchanged, 2);
    assert_eq!(service.store().generation(), generation);

    let after = service.store().get("a.md").unwrap();
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.source_hash, before.source_hash);
}

/// Malformed front matter is listed as a degraded raw document
#[tokio::test]
async fn test_malformed_front_matter_is_listed() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    let raw = "---\ntitle: [unclosed\n---\nStill here.\n";
    std::fs::write(root.join("broken.md"), raw).unwrap();
    std::fs::write(root.join("fine.md"), "---\ntitle: Fine\n---\nOk.\n").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    let report = service.ingest_all(&CancellationToken::new()).await.unwrap();
    assert!(report.failed.is_empty());

    let listed = service
        .query()
        .list(&Filter::All, &QueryContext::new())
        .unwrap();
    let broken = listed.iter().find(|n| n.path == "broken.md").unwrap();

    assert!(matches!(broken.status, NodeStatus::Degraded { .. }));
    assert!(broken.raw_metadata.is_empty());
    assert_eq!(broken.body, Body::raw(raw));
    assert_eq!(broken.computed_fields, ComputedFields::default());
    assert_eq!(listed.len(), 2);
}

/// Empty or unmatched searches return nothing
#[tokio::test]
async fn test_empty_search() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::write(root.join("a.md"), "# Rust\n\nAll about rust.").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    service.ingest_all(&CancellationToken::new()).await.unwrap();
    let query = service.query();
    let ctx = QueryContext::new();

    assert!(query.search("", &ctx).unwrap().is_empty());
    assert!(query.search("   ", &ctx).unwrap().is_empty());
    assert!(query.search("python", &ctx).unwrap().is_empty());
    assert_eq!(query.search("rust", &ctx).unwrap().len(), 1);
}

/// Concurrent writers to one path: the highest version is what stays stored
#[tokio::test]
async fn test_concurrent_puts_last_writer_wins() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    let service = ContentService::open(&config_for(&root)).await.unwrap();
    let store = service.store().clone();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let hash = format!("hash-{}", i);
            let outcome = store
                .put(ContentNode::new("same.md", hash.clone()))
                .await
                .unwrap();
            (outcome.version(), hash)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    let (last_version, last_hash) = results.iter().max_by_key(|(v, _)| *v).unwrap().clone();

    let stored = store.get("same.md").unwrap();
    assert_eq!(last_version, 8);
    assert_eq!(stored.updated_at, 8);
    assert_eq!(stored.source_hash, last_hash);
}

/// A file-backed service reopens with the same nodes and navigation
#[tokio::test]
async fn test_file_backend_round_trip() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("guide")).unwrap();
    std::fs::write(
        root.join("guide/setup.md"),
        "---\ntitle: Setup\ntags: [start]\n---\n# Setup\n\n## Install\n\nRun it.\n",
    )
    .unwrap();

    let config = ContentConfig {
        store: StoreBackend::File {
            dir: Some(temp_dir.path().join("store")),
        },
        ..config_for(&root)
    };

    let first = ContentService::open(&config).await.unwrap();
    first.ingest_all(&CancellationToken::new()).await.unwrap();
    let original = first.store().get("guide/setup.md").unwrap();
    drop(first);

    let reopened = ContentService::open(&config).await.unwrap();
    let restored = reopened.store().get("guide/setup.md").unwrap();
    assert_eq!(restored.raw_metadata, original.raw_metadata);
    assert_eq!(restored.body, original.body);
    assert_eq!(restored.computed_fields, original.computed_fields);
    assert_eq!(restored.source_hash, original.source_hash);
    assert_eq!(restored.updated_at, original.updated_at);

    let nav = reopened.query().navigation(&QueryContext::new()).unwrap();
    assert!(nav.find("guide/setup.md").is_some());
}

/// A running coordinator fed through an injected change queue.
struct Harness {
    changes: mpsc::Sender<FileChange>,
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), CoreError>>,
}

impl Harness {
    fn start(service: &ContentService, debounce: Duration) -> Self {
        let watcher = FileWatcher::new(WatcherOptions::default());
        let changes = watcher.sender();
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(WatchCoordinator::new(service.clone(), debounce).run(
            watcher,
            shutdown_rx,
            CancellationToken::new(),
        ));
        Self {
            changes,
            shutdown,
            handle,
        }
    }

    async fn send(&self, path: PathBuf, kind: ChangeKind) {
        self.changes.send(FileChange::new(path, kind)).await.unwrap();
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn child_paths(service: &ContentService, dir: &str) -> Vec<String> {
    let nav = service.query().navigation(&QueryContext::new()).unwrap();
    nav.find(dir)
        .map(|entry| entry.children.iter().map(|c| c.path.clone()).collect())
        .unwrap_or_default()
}

/// Two edits in one directory coalesce into one reload; deletes follow
#[tokio::test]
async fn test_watch_nested_directory_group() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("docs")).unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    let mut events = service.subscribe();
    let harness = Harness::start(&service, Duration::from_millis(50));

    std::fs::write(root.join("docs/a.md"), "---\ntitle: A\n---\n# A\n").unwrap();
    std::fs::write(root.join("docs/b.md"), "---\ntitle: B\n---\n# B\n").unwrap();
    harness.send(root.join("docs/a.md"), ChangeKind::Created).await;
    harness.send(root.join("docs/b.md"), ChangeKind::Created).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["docs/a.md", "docs/b.md"]);
    assert!(event.removed.is_empty());
    assert_eq!(child_paths(&service, "docs"), vec!["docs/a.md", "docs/b.md"]);

    std::fs::remove_file(root.join("docs/a.md")).unwrap();
    harness.send(root.join("docs/a.md"), ChangeKind::Deleted).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.removed, vec!["docs/a.md"]);
    assert_eq!(child_paths(&service, "docs"), vec!["docs/b.md"]);

    harness.stop().await;
}

/// Files excluded by an ignore file stay out of the store in watch mode too
#[tokio::test]
async fn test_watch_respects_ignore_file() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("drafts")).unwrap();
    std::fs::write(root.join(IGNORE_FILE), "drafts/\n").unwrap();
    std::fs::write(root.join("drafts/wip.md"), "# WIP").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    service.ingest_all(&CancellationToken::new()).await.unwrap();
    assert!(service.store().get("drafts/wip.md").is_err());

    let mut events = service.subscribe();
    let harness = Harness::start(&service, Duration::from_millis(20));

    std::fs::write(root.join("drafts/wip.md"), "# WIP, edited").unwrap();
    harness.send(root.join("drafts/wip.md"), ChangeKind::Modified).await;
    std::fs::write(root.join("kept.md"), "# Kept").unwrap();
    harness.send(root.join("kept.md"), ChangeKind::Created).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["kept.md"]);
    assert!(service.store().get("drafts/wip.md").is_err());

    // Lifting the rule brings the directory in.
    std::fs::write(root.join(IGNORE_FILE), "").unwrap();
    harness.send(root.join(IGNORE_FILE), ChangeKind::Modified).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["drafts/wip.md"]);
    assert!(service.store().get("drafts/wip.md").is_ok());

    // And restoring it takes it out again.
    std::fs::write(root.join(IGNORE_FILE), "drafts/\n").unwrap();
    harness.send(root.join(IGNORE_FILE), ChangeKind::Modified).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.removed, vec!["drafts/wip.md"]);
    assert!(child_paths(&service, "drafts").is_empty());

    harness.stop().await;
}

/// Holds reads below one directory until permits are added.
struct GatedSource {
    inner: FsSource,
    gated: String,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl DocumentSource for GatedSource {
    async fn list(&self) -> Result<Vec<SourceEntry>, IndexerError> {
        self.inner.list().await
    }

    async fn read(&self, path: &str) -> Result<SourceDocument, IndexerError> {
        if path.starts_with(&self.gated) {
            let _permit = self.gate.acquire().await.map_err(|_| IndexerError::Cancelled)?;
        }
        self.inner.read(path).await
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.inner.is_ignored(path)
    }

    fn is_ignored_dir(&self, path: &str) -> bool {
        self.inner.is_ignored_dir(path)
    }

    async fn reload_ignores(&self) -> Result<(), IndexerError> {
        self.inner.reload_ignores().await
    }

    fn logical_path(&self, absolute: &Path) -> Option<String> {
        self.inner.logical_path(absolute)
    }
}

/// A slow group does not hold back an unrelated one
#[tokio::test]
async fn test_slow_group_does_not_block_others() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("slow")).unwrap();
    std::fs::create_dir_all(root.join("fast")).unwrap();

    let gate = Arc::new(Semaphore::new(0));
    let service = ContentService::new(
        Arc::new(GatedSource {
            inner: config_for(&root).source().unwrap(),
            gated: "slow/".to_string(),
            gate: gate.clone(),
        }),
        Arc::new(PipelineBuilder::with_defaults().build().unwrap()),
        Arc::new(MemoryStore::new()),
        LocaleSettings::default(),
        2,
    );
    let mut events = service.subscribe();
    let harness = Harness::start(&service, Duration::from_millis(20));

    std::fs::write(root.join("slow/a.md"), "# Slow").unwrap();
    std::fs::write(root.join("fast/b.md"), "# Fast").unwrap();
    harness.send(root.join("slow/a.md"), ChangeKind::Created).await;
    harness.send(root.join("fast/b.md"), ChangeKind::Created).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["fast/b.md"]);
    assert!(service.store().get("slow/a.md").is_err());

    gate.add_permits(1);
    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["slow/a.md"]);

    harness.stop().await;
}

/// Reordering one document moves it in navigation and in default list order
#[tokio::test]
async fn test_watch_reorders_navigation() {
    let temp_dir = tempdir().unwrap();
    let root = content_root(temp_dir.path());
    std::fs::create_dir_all(root.join("guide")).unwrap();
    std::fs::create_dir_all(root.join("ref")).unwrap();
    std::fs::write(root.join("guide/a.md"), "---\norder: 1\n---\n").unwrap();
    std::fs::write(root.join("guide/b.md"), "---\norder: 2\n---\n").unwrap();
    std::fs::write(root.join("ref/x.md"), "---\norder: 1\n---\n").unwrap();
    std::fs::write(root.join("ref/y.md"), "---\norder: 2\n---\n").unwrap();

    let service = ContentService::open(&config_for(&root)).await.unwrap();
    service.ingest_all(&CancellationToken::new()).await.unwrap();
    let mut events = service.subscribe();
    let harness = Harness::start(&service, Duration::from_millis(20));

    let listed = |service: &ContentService| -> Vec<String> {
        service
            .query()
            .list(&Filter::All, &QueryContext::new())
            .unwrap()
            .iter()
            .map(|n| n.path.clone())
            .collect()
    };
    assert_eq!(
        listed(&service),
        vec!["guide/a.md", "guide/b.md", "ref/x.md", "ref/y.md"]
    );

    std::fs::write(root.join("guide/a.md"), "---\norder: 3\n---\n").unwrap();
    harness.send(root.join("guide/a.md"), ChangeKind::Modified).await;

    let event = next_event(&mut events).await;
    assert_eq!(event.updated, vec!["guide/a.md"]);
    assert_eq!(child_paths(&service, "guide"), vec!["guide/b.md", "guide/a.md"]);
    assert_eq!(child_paths(&service, "ref"), vec!["ref/x.md", "ref/y.md"]);
    assert_eq!(
        listed(&service),
        vec!["guide/b.md", "guide/a.md", "ref/x.md", "ref/y.md"]
    );

    harness.stop().await;
}
