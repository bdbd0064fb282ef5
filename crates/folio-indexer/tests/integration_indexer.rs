//! Integration tests for the Folio ingestion path: source, pipeline, store and navigation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use folio_indexer::{
    ContentNode, ContentStore, DocumentSource, FileStore, FsSource, IgnoreRules, MemoryStore,
    NavigationBuilder, Pipeline, PipelineBuilder, PutOutcome,
};

/// Helper to create a small content tree
fn create_content(base: &Path) -> PathBuf {
    let root = base.join("content");
    std::fs::create_dir_all(root.join("docs/guide")).unwrap();
    std::fs::create_dir_all(root.join(".drafts")).unwrap();

    std::fs::write(
        root.join("index.md"),
        "---\ntitle: Home\n---\n# Welcome\n\nSee the [guide](./docs/guide/setup.md).\n",
    )
    .unwrap();
    std::fs::write(
        root.join("docs/1.intro.md"),
        "---\ntags: [start]\n---\n# Intro\n\n## Why\n\nBecause.\n",
    )
    .unwrap();
    std::fs::write(
        root.join("docs/guide/setup.md"),
        "---\ntitle: Setup\norder: 1\n---\n# Setup\n\n::note\nInstall it.\n::\n",
    )
    .unwrap();
    std::fs::write(root.join("docs/broken.md"), "---\ntitle: [oops\n---\nBody\n").unwrap();
    std::fs::write(root.join(".drafts/secret.md"), "# Secret").unwrap();
    std::fs::write(root.join("docs/-wip.md"), "# WIP").unwrap();
    std::fs::write(root.join("docs/image.png"), [0u8, 1, 2]).unwrap();

    root
}

async fn ingest(
    source: &FsSource,
    pipeline: &Pipeline,
    store: &dyn ContentStore,
    nav: &mut NavigationBuilder,
) -> Vec<PutOutcome> {
    let mut outcomes = Vec::new();
    for entry in source.list().await.unwrap() {
        let doc = source.read(&entry.path).await.unwrap();
        let node = pipeline.process(&doc.path, &doc.bytes, doc.modified);
        let outcome = store.put(node).await.unwrap();
        nav.upsert(&store.get(&entry.path).unwrap());
        outcomes.push(outcome);
    }
    outcomes
}

/// Test full ingestion end-to-end
#[tokio::test]
async fn test_ingestion_end_to_end() {
    let temp_dir = tempdir().unwrap();
    let root = create_content(temp_dir.path());

    let source = FsSource::new(&root, IgnoreRules::default()).unwrap();
    let pipeline = PipelineBuilder::with_defaults().build().unwrap();
    let store = MemoryStore::new();
    let mut nav = NavigationBuilder::new();

    ingest(&source, &pipeline, &store, &mut nav).await;

    let paths: Vec<String> = store.snapshot().paths().map(str::to_string).collect();
    assert_eq!(
        paths,
        vec!["docs/1.intro.md", "docs/broken.md", "docs/guide/setup.md", "index.md"]
    );

    // Malformed front matter is stored degraded, not dropped
    let broken = store.get("docs/broken.md").unwrap();
    assert!(broken.is_degraded());

    let home = store.get("index.md").unwrap();
    assert_eq!(home.computed_fields.links[0].target, "docs/guide/setup.md");

    assert_eq!(store.query_tag("start").len(), 1);
    assert_eq!(store.query_prefix("docs/").len(), 3);
}

/// Every stored document appears exactly once in navigation
#[tokio::test]
async fn test_navigation_completeness() {
    let temp_dir = tempdir().unwrap();
    let root = create_content(temp_dir.path());

    let source = FsSource::new(&root, IgnoreRules::default()).unwrap();
    let pipeline = PipelineBuilder::with_defaults().build().unwrap();
    let store = MemoryStore::new();
    let mut nav = NavigationBuilder::new();

    ingest(&source, &pipeline, &store, &mut nav).await;

    let tree = nav.tree();
    let mut listed: Vec<&str> = tree.document_paths();
    listed.sort();
    let stored: Vec<String> = store.snapshot().paths().map(str::to_string).collect();
    assert_eq!(listed, stored.iter().map(String::as_str).collect::<Vec<_>>());

    assert_eq!(tree.title, "Home");
    let docs = tree.find("docs").unwrap();
    // Numeric filename prefixes order before unordered siblings
    assert_eq!(docs.children[0].path, "docs/1.intro.md");
}

/// Re-ingesting unchanged sources writes nothing
#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let root = create_content(temp_dir.path());

    let source = FsSource::new(&root, IgnoreRules::default()).unwrap();
    let pipeline = PipelineBuilder::with_defaults().build().unwrap();
    let store = MemoryStore::new();
    let mut nav = NavigationBuilder::new();

    ingest(&source, &pipeline, &store, &mut nav).await;
    let generation = store.generation();
    let before = nav.tree();

    let outcomes = ingest(&source, &pipeline, &store, &mut nav).await;
    assert!(outcomes.iter().all(|o| !o.is_write()));
    assert_eq!(store.generation(), generation);
    assert_eq!(nav.tree(), before);
}

/// Nodes survive a restart of the persistent store
#[tokio::test]
async fn test_file_store_round_trip() {
    let temp_dir = tempdir().unwrap();
    let root = create_content(temp_dir.path());
    let store_dir = temp_dir.path().join("store");

    let source = FsSource::new(&root, IgnoreRules::default()).unwrap();
    let pipeline = PipelineBuilder::with_defaults().build().unwrap();

    let originals = {
        let store = FileStore::open(store_dir.clone()).await.unwrap();
        let mut nav = NavigationBuilder::new();
        ingest(&source, &pipeline, &store, &mut nav).await;
        store.snapshot()
    };

    let reopened: Arc<dyn ContentStore> = Arc::new(FileStore::open(store_dir).await.unwrap());
    assert_eq!(reopened.len(), originals.len());
    for node in originals.iter() {
        let loaded = reopened.get(&node.path).unwrap();
        assert_eq!(loaded.as_ref(), node.as_ref());
    }
}

/// Versions keep increasing for a path across deletes and store reopens
#[tokio::test]
async fn test_file_store_versions_monotonic_across_reopen() {
    let temp_dir = tempdir().unwrap();
    let dir = temp_dir.path().join("store");
    let mut seen = Vec::new();

    {
        let store = FileStore::open(dir.clone()).await.unwrap();
        seen.push(store.put(ContentNode::new("a.md", "v1")).await.unwrap().version());
        seen.push(store.put(ContentNode::new("a.md", "v2")).await.unwrap().version());
        store.delete("a.md").await.unwrap();
        seen.push(store.put(ContentNode::new("a.md", "v3")).await.unwrap().version());
        store.delete("a.md").await.unwrap();
    }

    let store = FileStore::open(dir.clone()).await.unwrap();
    assert!(store.get("a.md").is_err());
    seen.push(store.put(ContentNode::new("a.md", "v1")).await.unwrap().version());
    drop(store);

    let store = FileStore::open(dir).await.unwrap();
    assert_eq!(store.get("a.md").unwrap().updated_at, 4);
    seen.push(store.put(ContentNode::new("a.md", "v5")).await.unwrap().version());

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

/// Ignore files exclude the same paths from a walk and from single-path checks
#[tokio::test]
async fn test_ignore_file_consistent_between_walk_and_checks() {
    let temp_dir = tempdir().unwrap();
    let root = create_content(temp_dir.path());
    std::fs::write(root.join("docs").join(folio_indexer::IGNORE_FILE), "guide/\n").unwrap();

    let source = FsSource::new(&root, IgnoreRules::default()).unwrap();
    let listed: Vec<String> = source.list().await.unwrap().into_iter().map(|e| e.path).collect();

    assert!(!listed.contains(&"docs/guide/setup.md".to_string()));
    assert!(source.is_ignored("docs/guide/setup.md"));
    assert!(source.is_ignored_dir("docs/guide"));
    for path in &listed {
        assert!(!source.is_ignored(path), "{} listed but ignored", path);
    }
}
