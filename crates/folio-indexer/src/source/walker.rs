//! Content tree walker with ignore-list support.

use super::IgnoreRules;
use crate::IndexerError;
use chrono::{DateTime, Utc};
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

/// Ignore file honored in every directory of the content tree.
pub const IGNORE_FILE: &str = ".folioignore";

/// A discovered file entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified time
    pub modified: DateTime<Utc>,
}

/// Walks a content root, skipping ignored files.
pub struct Walker {
    root: PathBuf,
    follow_symlinks: bool,
}

impl Walker {
    /// Create a new walker for the given root directory.
    pub fn new(root: &Path, follow_symlinks: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            follow_symlinks,
        }
    }

    /// Walk the directory tree and return all content files, sorted by path.
    pub fn walk(&self, rules: &IgnoreRules) -> Result<Vec<FileEntry>, IndexerError> {
        let (tx, rx) = mpsc::channel();

        // Every filter lives in `IgnoreRules`, so single paths from the
        // watcher are judged the same way as a full walk.
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .follow_links(self.follow_symlinks)
            .standard_filters(false);

        let root = self.root.clone();
        let walker = builder.build_parallel();

        walker.run(|| {
            let tx = tx.clone();
            let root = root.clone();
            Box::new(move |result| {
                match result {
                    Ok(entry) => {
                        let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);

                        if entry.depth() == 0 {
                            return WalkState::Continue;
                        }
                        if is_dir {
                            return if rules.is_ignored_dir(rel) {
                                WalkState::Skip
                            } else {
                                WalkState::Continue
                            };
                        }
                        if rules.is_ignored(rel) {
                            return WalkState::Continue;
                        }

                        if let Ok(metadata) = entry.metadata() {
                            let modified = metadata
                                .modified()
                                .map(DateTime::<Utc>::from)
                                .unwrap_or_else(|_| Utc::now());

                            let sent = tx.send(FileEntry {
                                path: entry.path().to_path_buf(),
                                size: metadata.len(),
                                modified,
                            });
                            if sent.is_err() {
                                debug!("Walk receiver gone, stopping");
                                return WalkState::Quit;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Walk error");
                        // Don't fail the entire walk for individual errors
                    }
                }
                WalkState::Continue
            })
        });

        // Drop the original sender so the receiver knows when we're done
        drop(tx);

        let mut entries: Vec<FileEntry> = rx.into_iter().collect();

        // Sort by path for deterministic ordering
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(entries)
    }
}
