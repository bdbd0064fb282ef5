//! Watch coordination.
//!
//! Changes are grouped by parent directory. Each group runs its own
//! `Idle -> Debouncing -> Reingesting -> Idle` cycle: the debounce window is
//! fixed from the first event, and events that arrive while the group is
//! reingesting wait for the next cycle. Groups reingest concurrently unless
//! one directory contains the other, since directory events reconcile a
//! whole subtree.

use crate::service::{ContentService, PathOutcome};
use crate::CoreError;
use folio_indexer::{
    CancellationToken, ChangeBatcher, ChangeKind, FileChange, FileWatcher, IndexerError,
    IGNORE_FILE,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// State of one path group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    Debouncing { deadline: Instant },
    Reingesting,
}

#[derive(Debug)]
struct Group {
    state: GroupState,
    pending: ChangeBatcher,
    /// Arrived while reingesting
    queued: ChangeBatcher,
}

/// Per-group debounce state machine, driven by explicit instants.
#[derive(Debug)]
pub struct GroupDebouncer {
    window: Duration,
    groups: BTreeMap<String, Group>,
}

impl GroupDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            groups: BTreeMap::new(),
        }
    }

    /// Record a change for `group` seen at `now`.
    pub fn push(&mut self, group: &str, change: FileChange, now: Instant) {
        let window = self.window;
        let entry = self.groups.entry(group.to_string()).or_insert_with(|| Group {
            state: GroupState::Idle,
            pending: ChangeBatcher::new(),
            queued: ChangeBatcher::new(),
        });

        match entry.state {
            GroupState::Idle => {
                entry.pending.add(change);
                entry.state = GroupState::Debouncing {
                    deadline: now + window,
                };
            }
            GroupState::Debouncing { .. } => entry.pending.add(change),
            GroupState::Reingesting => entry.queued.add(change),
        }
    }

    /// Earliest debounce deadline among groups free to start.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.groups
            .iter()
            .filter_map(|(name, g)| match g.state {
                GroupState::Debouncing { deadline } if !self.is_blocked(name) => Some(deadline),
                _ => None,
            })
            .min()
    }

    /// Move the group with the earliest expired deadline to `Reingesting`
    /// and hand out its batch.
    ///
    /// A group waits while a group nested with it is reingesting.
    pub fn poll(&mut self, now: Instant) -> Option<(String, Vec<FileChange>)> {
        let name = self
            .groups
            .iter()
            .filter_map(|(name, g)| match g.state {
                GroupState::Debouncing { deadline } if deadline <= now => Some((deadline, name)),
                _ => None,
            })
            .filter(|(_, name)| !self.is_blocked(name))
            .min_by_key(|(deadline, _)| *deadline)
            .map(|(_, name)| name.clone())?;

        let group = self.groups.get_mut(&name)?;
        group.state = GroupState::Reingesting;
        Some((name, group.pending.take()))
    }

    fn is_blocked(&self, name: &str) -> bool {
        self.groups
            .iter()
            .any(|(other, g)| g.state == GroupState::Reingesting && nested(name, other))
    }

    /// Finish a reingestion started at [`GroupDebouncer::poll`].
    ///
    /// Queued changes start a fresh window from `now`.
    pub fn complete(&mut self, group: &str, now: Instant) {
        let window = self.window;
        let Some(entry) = self.groups.get_mut(group) else {
            return;
        };
        if entry.state != GroupState::Reingesting {
            return;
        }

        if entry.queued.is_empty() {
            self.groups.remove(group);
        } else {
            for change in entry.queued.take() {
                entry.pending.add(change);
            }
            entry.state = GroupState::Debouncing {
                deadline: now + window,
            };
        }
    }

    pub fn state(&self, group: &str) -> GroupState {
        self.groups
            .get(group)
            .map(|g| g.state)
            .unwrap_or(GroupState::Idle)
    }

    /// Whether any group is waiting or reingesting.
    pub fn is_busy(&self) -> bool {
        !self.groups.is_empty()
    }
}

/// Parent directory of a logical path; the root group is `""`.
pub fn group_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// One directory group equals or contains the other.
fn nested(a: &str, b: &str) -> bool {
    fn contains(outer: &str, inner: &str) -> bool {
        outer.is_empty() || inner == outer || inner.starts_with(&format!("{}/", outer))
    }
    contains(a, b) || contains(b, a)
}

fn is_ignore_file(path: &Path) -> bool {
    path.file_name().map(|name| name == IGNORE_FILE).unwrap_or(false)
}

/// Drives reingestion from file system changes.
pub struct WatchCoordinator {
    service: ContentService,
    debouncer: GroupDebouncer,
}

impl WatchCoordinator {
    pub fn new(service: ContentService, debounce: Duration) -> Self {
        Self {
            service,
            debouncer: GroupDebouncer::new(debounce),
        }
    }

    /// Run until shutdown, cancellation or a fatal store error.
    ///
    /// A closed change channel also ends the loop once pending work is done.
    /// Batches already running finish their writes before this returns.
    pub async fn run(
        mut self,
        mut watcher: FileWatcher,
        mut shutdown: broadcast::Receiver<()>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        info!("Watch coordinator started");
        let mut in_flight: JoinSet<(String, Result<(), IndexerError>)> = JoinSet::new();
        let mut open = true;

        loop {
            if !open && in_flight.is_empty() && !self.debouncer.is_busy() {
                break;
            }

            let deadline = self.debouncer.next_deadline();
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Watch coordinator shutting down");
                    break;
                }
                _ = cancel.cancelled() => {
                    info!("Watch coordinator cancelled");
                    break;
                }
                change = watcher.next(), if open => match change {
                    Some(change) => self.route(change),
                    None => open = false,
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    let now = Instant::now();
                    while let Some((group, batch)) = self.debouncer.poll(now) {
                        debug!(group = %group, changes = batch.len(), "Reingesting group");
                        let service = self.service.clone();
                        let cancel = cancel.clone();
                        in_flight.spawn(async move {
                            let result = apply_changes(&service, batch, &cancel).await;
                            (group, result)
                        });
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (group, result) = joined
                        .map_err(|e| CoreError::Fatal(format!("reingestion task failed: {e}")))?;
                    self.debouncer.complete(&group, Instant::now());
                    match result {
                        Ok(()) => {}
                        Err(IndexerError::Cancelled) => {
                            info!(group = %group, "Reingestion cancelled");
                            break;
                        }
                        Err(e) => {
                            error!(group = %group, error = %e, "Stopping watch coordinator");
                            finish(&mut in_flight).await?;
                            return Err(e.into());
                        }
                    }
                }
            }
        }

        finish(&mut in_flight).await?;
        info!("Watch coordinator stopped");
        Ok(())
    }

    /// Drop ignored paths, group the rest.
    fn route(&mut self, change: FileChange) {
        let source = self.service.source();
        let Some(path) = source.logical_path(&change.path) else {
            return;
        };

        // Ignore files are never content, but a change to one re-scopes
        // its directory.
        if is_ignore_file(&change.path) {
            let group = group_of(&path).to_string();
            self.debouncer.push(&group, change, Instant::now());
            return;
        }

        let ignored = match (change.kind, change.is_dir) {
            (ChangeKind::Deleted, _) | (_, true) => source.is_ignored_dir(&path),
            _ => source.is_ignored(&path),
        };
        if ignored {
            debug!(path = %path, "Ignoring change");
            return;
        }

        let group = group_of(&path).to_string();
        self.debouncer.push(&group, change, Instant::now());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Let running batches finish their writes. Reports the first fatal error.
async fn finish(
    in_flight: &mut JoinSet<(String, Result<(), IndexerError>)>,
) -> Result<(), CoreError> {
    let mut failure = None;
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((group, Err(e))) if e.is_fatal() => {
                error!(group = %group, error = %e, "Reingestion failed");
                failure.get_or_insert(CoreError::from(e));
            }
            Ok((group, _)) => debug!(group = %group, "Finished in-flight reingestion"),
            Err(e) => {
                failure.get_or_insert(CoreError::Fatal(format!("reingestion task failed: {e}")));
            }
        }
    }
    failure.map_or(Ok(()), Err)
}

/// Reingest one batch, then publish a reload.
///
/// Per-path failures are logged and skipped; only fatal errors and
/// cancellation end the batch early.
async fn apply_changes(
    service: &ContentService,
    batch: Vec<FileChange>,
    cancel: &CancellationToken,
) -> Result<(), IndexerError> {
    let mut updated = Vec::new();
    let mut removed = Vec::new();
    let mut result = Ok(());

    for change in batch {
        if let Err(e) = cancel.check() {
            result = Err(e);
            break;
        }
        let Some(path) = service.source().logical_path(&change.path) else {
            continue;
        };

        let applied = match (change.kind, change.is_dir) {
            _ if is_ignore_file(&change.path) => service
                .reapply_ignores(group_of(&path), cancel)
                .await
                .map(|(u, r)| {
                    updated.extend(u);
                    removed.extend(r);
                }),
            (ChangeKind::Deleted, _) => service.remove_path(&path).await.map(|paths| {
                removed.extend(paths);
            }),
            (_, true) => service.reconcile_dir(&path, cancel).await.map(|(u, r)| {
                updated.extend(u);
                removed.extend(r);
            }),
            _ => service.ingest_path(&path).await.map(|outcome| match outcome {
                PathOutcome::Updated => updated.push(path.clone()),
                PathOutcome::Removed => removed.push(path.clone()),
                PathOutcome::Unchanged | PathOutcome::Missing => {}
            }),
        };

        match applied {
            Ok(()) => {}
            Err(e) if e.is_fatal() || matches!(e, IndexerError::Cancelled) => {
                result = Err(e);
                break;
            }
            Err(e) => warn!(path = %path, error = %e, "Failed to reingest"),
        }
    }

    service.publish(updated, removed);
    result
}
