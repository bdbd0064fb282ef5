//! File system watcher for the content root.
//!
//! Uses FSEvents on macOS and inotify on Linux. The debouncer here only
//! smooths raw event bursts; grouping and the reingestion window are the
//! caller's business.

use crate::IndexerError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Coalesce two changes to the same path, `self` being the earlier one.
    pub fn merge(self, later: ChangeKind) -> ChangeKind {
        match (self, later) {
            (_, ChangeKind::Deleted) => ChangeKind::Deleted,
            (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
            (ChangeKind::Deleted, _) => ChangeKind::Modified,
            (_, later) => later,
        }
    }
}

/// A file system change event.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    /// Absolute path of the changed entry
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// The path was a directory when the event was seen
    pub is_dir: bool,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_dir: false,
        }
    }
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Window used to smooth raw notify bursts
    pub debounce_duration: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(50),
        }
    }
}

type DebounceResult = Result<Vec<DebouncedEvent>, Vec<notify::Error>>;

/// Recursive watcher over a content root, feeding an async queue.
pub struct FileWatcher {
    options: WatcherOptions,
    tx: mpsc::Sender<FileChange>,
    rx: mpsc::Receiver<FileChange>,
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl FileWatcher {
    pub fn new(options: WatcherOptions) -> Self {
        let (tx, rx) = mpsc::channel(1000);
        Self {
            options,
            tx,
            rx,
            debouncer: None,
        }
    }

    /// Start watching `root` and everything below it.
    pub fn watch(&mut self, root: &Path) -> Result<(), IndexerError> {
        let root = root
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(root.display().to_string()))?;

        let tx = self.tx.clone();
        let mut debouncer = new_debouncer(
            self.options.debounce_duration,
            None,
            move |result: DebounceResult| forward(&tx, result),
        )
        .map_err(|e| IndexerError::Watcher(e.to_string()))?;
        debouncer
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e: notify::Error| IndexerError::Watcher(e.to_string()))?;

        info!(root = ?root, "Watching content root");
        self.debouncer = Some(debouncer);
        Ok(())
    }

    /// Whether a root is being watched.
    pub fn is_watching(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Sender feeding this watcher's queue, for injecting changes.
    pub fn sender(&self) -> mpsc::Sender<FileChange> {
        self.tx.clone()
    }

    /// Receive the next change event.
    pub async fn next(&mut self) -> Option<FileChange> {
        self.rx.recv().await
    }

    /// Try to receive a change event without blocking.
    pub fn try_next(&mut self) -> Option<FileChange> {
        self.rx.try_recv().ok()
    }
}

/// Hand one debounced burst to the async side, coalesced per path.
///
/// Runs on the notify thread.
fn forward(tx: &mpsc::Sender<FileChange>, result: DebounceResult) {
    let events = match result {
        Ok(events) => events,
        Err(errors) => {
            for e in errors {
                warn!(error = %e, "Watcher error");
            }
            return;
        }
    };

    let mut batch = ChangeBatcher::new();
    for event in &events {
        for change in convert_event(&event.event) {
            batch.add(change);
        }
    }
    for change in batch.take() {
        if tx.blocking_send(change).is_err() {
            debug!("Change receiver closed, dropping events");
            return;
        }
    }
}

/// Convert a notify event into changes. Renames become delete + create.
fn convert_event(event: &Event) -> Vec<FileChange> {
    let changes = match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| observed(p, ChangeKind::Created))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => rename_changes(*mode, &event.paths),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| observed(p, ChangeKind::Modified))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| FileChange::new(p.clone(), ChangeKind::Deleted))
            .collect(),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    for change in &changes {
        debug!(path = ?change.path, kind = ?change.kind, "File change detected");
    }
    changes
}

fn rename_changes(mode: RenameMode, paths: &[PathBuf]) -> Vec<FileChange> {
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => vec![
            FileChange::new(from.clone(), ChangeKind::Deleted),
            observed(to, ChangeKind::Created),
        ],
        (RenameMode::From, [from, ..]) => vec![FileChange::new(from.clone(), ChangeKind::Deleted)],
        (RenameMode::To, [to, ..]) => vec![observed(to, ChangeKind::Created)],
        // Unpaired rename: whether the path still exists decides.
        (_, paths) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    observed(p, ChangeKind::Created)
                } else {
                    FileChange::new(p.clone(), ChangeKind::Deleted)
                }
            })
            .collect(),
    }
}

fn observed(path: &Path, kind: ChangeKind) -> FileChange {
    FileChange {
        path: path.to_path_buf(),
        kind,
        is_dir: path.is_dir(),
    }
}

/// Coalesces changes per path, keeping first-seen order.
#[derive(Debug, Default)]
pub struct ChangeBatcher {
    changes: Vec<FileChange>,
}

impl ChangeBatcher {
    /// Create an empty batcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change to the batch.
    pub fn add(&mut self, change: FileChange) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.path == change.path) {
            existing.kind = existing.kind.merge(change.kind);
            existing.is_dir |= change.is_dir;
        } else {
            self.changes.push(change);
        }
    }

    /// Take the current batch and reset.
    pub fn take(&mut self) -> Vec<FileChange> {
        std::mem::take(&mut self.changes)
    }

    /// Get the number of pending changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    fn debounced(event: Event) -> DebouncedEvent {
        DebouncedEvent {
            event,
            time: std::time::Instant::now(),
        }
    }

    fn kinds(changes: &[FileChange]) -> Vec<ChangeKind> {
        changes.iter().map(|c| c.kind).collect()
    }

    #[tokio::test]
    async fn test_watcher_create() {
        let temp_dir = tempdir().unwrap();
        let mut watcher = FileWatcher::new(WatcherOptions::default());
        assert!(!watcher.is_watching());

        assert!(watcher.watch(temp_dir.path()).is_ok());
        assert!(watcher.is_watching());
        assert!(watcher.try_next().is_none());
    }

    #[test]
    fn test_forward_coalesces_burst() {
        let (tx, mut rx) = mpsc::channel(10);
        let burst = vec![
            debounced(event(EventKind::Create(CreateKind::File), &["/c/a.md"])),
            debounced(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/c/a.md"],
            )),
            debounced(event(EventKind::Remove(RemoveKind::File), &["/c/b.md"])),
        ];

        forward(&tx, Ok(burst));
        drop(tx);

        let mut received = Vec::new();
        while let Ok(change) = rx.try_recv() {
            received.push((change.path, change.kind));
        }
        assert_eq!(
            received,
            vec![
                (PathBuf::from("/c/a.md"), ChangeKind::Created),
                (PathBuf::from("/c/b.md"), ChangeKind::Deleted),
            ]
        );
    }

    #[test]
    fn test_forward_stops_on_closed_receiver() {
        let (tx, rx) = mpsc::channel(10);
        drop(rx);
        let burst = vec![debounced(event(
            EventKind::Create(CreateKind::File),
            &["/c/a.md"],
        ))];
        forward(&tx, Ok(burst));
        forward(&tx, Err(vec![notify::Error::generic("boom")]));
    }

    #[tokio::test]
    async fn test_watcher_missing_root() {
        let mut watcher = FileWatcher::new(WatcherOptions::default());
        let result = watcher.watch(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(IndexerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_injected_changes_are_received() {
        let mut watcher = FileWatcher::new(WatcherOptions::default());
        watcher
            .sender()
            .send(FileChange::new("/c/a.md", ChangeKind::Modified))
            .await
            .unwrap();

        let change = watcher.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
    }

    #[test]
    fn test_merge_rules() {
        use ChangeKind::*;
        assert_eq!(Created.merge(Modified), Created);
        assert_eq!(Modified.merge(Deleted), Deleted);
        assert_eq!(Created.merge(Deleted), Deleted);
        assert_eq!(Deleted.merge(Created), Modified);
        assert_eq!(Deleted.merge(Modified), Modified);
        assert_eq!(Modified.merge(Modified), Modified);
    }

    #[test]
    fn test_change_batcher_coalesces() {
        let mut batcher = ChangeBatcher::new();

        batcher.add(FileChange::new("a.md", ChangeKind::Created));
        batcher.add(FileChange::new("b.md", ChangeKind::Modified));
        batcher.add(FileChange::new("a.md", ChangeKind::Modified));
        batcher.add(FileChange::new("b.md", ChangeKind::Deleted));
        assert_eq!(batcher.len(), 2);

        let batch = batcher.take();
        assert_eq!(kinds(&batch), vec![ChangeKind::Created, ChangeKind::Deleted]);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_convert_event_create_modify_delete() {
        let created = convert_event(&event(EventKind::Create(CreateKind::File), &["a.md"]));
        assert_eq!(kinds(&created), vec![ChangeKind::Created]);

        let modified = convert_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["a.md"],
        ));
        assert_eq!(kinds(&modified), vec![ChangeKind::Modified]);

        let removed = convert_event(&event(EventKind::Remove(RemoveKind::File), &["a.md"]));
        assert_eq!(kinds(&removed), vec![ChangeKind::Deleted]);
    }

    #[test]
    fn test_convert_rename_splits() {
        let changes = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/c/old.md", "/c/new.md"],
        ));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, PathBuf::from("/c/old.md"));
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
        assert_eq!(changes[1].path, PathBuf::from("/c/new.md"));
        assert_eq!(changes[1].kind, ChangeKind::Created);
    }

    #[test]
    fn test_convert_rename_from_to() {
        let from = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/c/old.md"],
        ));
        assert_eq!(kinds(&from), vec![ChangeKind::Deleted]);

        let to = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/c/new.md"],
        ));
        assert_eq!(kinds(&to), vec![ChangeKind::Created]);
    }

    #[test]
    fn test_convert_event_access_ignored() {
        let changes = convert_event(&event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["a.md"],
        ));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_directory_flag() {
        let temp_dir = tempdir().unwrap();
        let changes = convert_event(&Event {
            kind: EventKind::Create(CreateKind::Folder),
            paths: vec![temp_dir.path().to_path_buf()],
            attrs: Default::default(),
        });
        assert!(changes[0].is_dir);
    }
}
