//! Document source: enumerates and reads content files.
//!
//! Listing is a cheap walk that can be repeated at any time; bytes are read
//! lazily per entry so callers can tolerate files that vanish in between.

mod walker;

pub use walker::{FileEntry, Walker, IGNORE_FILE};

use crate::IndexerError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A listed document, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Logical path (slash separated, relative to the content root)
    pub path: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// A document with its bytes.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub bytes: Vec<u8>,
    pub modified: DateTime<Utc>,
}

/// Where documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Enumerate all non-ignored documents in filesystem order.
    async fn list(&self) -> Result<Vec<SourceEntry>, IndexerError>;

    /// Read one document. Fails with [`IndexerError::NotFound`] if it vanished.
    async fn read(&self, path: &str) -> Result<SourceDocument, IndexerError>;

    /// Whether a logical document path is excluded by the ignore list.
    fn is_ignored(&self, path: &str) -> bool;

    /// Whether a logical directory path is excluded. Extensions are not checked.
    fn is_ignored_dir(&self, path: &str) -> bool;

    /// Re-read ignore files after one of them changed.
    async fn reload_ignores(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Map an absolute filesystem path to a logical path, if it lies under the root.
    fn logical_path(&self, absolute: &Path) -> Option<String>;
}

/// Which files are skipped before anything reads them.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    prefixes: Vec<String>,
    extensions: Vec<String>,
    overrides: Option<Override>,
    /// Parsed ignore files keyed by their directory, deepest first
    files: Vec<(PathBuf, Gitignore)>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            prefixes: vec![".".to_string(), "-".to_string()],
            extensions: vec!["md".to_string(), "markdown".to_string()],
            overrides: None,
            files: Vec::new(),
        }
    }
}

impl IgnoreRules {
    /// Build rules for a content root.
    ///
    /// `patterns` are gitignore-style globs relative to `root`.
    pub fn new(
        root: &Path,
        prefixes: Vec<String>,
        extensions: Vec<String>,
        patterns: &[String],
    ) -> Result<Self, IndexerError> {
        let overrides = if patterns.is_empty() {
            None
        } else {
            let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            let mut builder = OverrideBuilder::new(root);
            for pattern in patterns {
                builder
                    .add(&format!("!{}", pattern.trim_start_matches('!')))
                    .map_err(|e| IndexerError::Config(format!("ignore pattern {pattern}: {e}")))?;
            }
            Some(
                builder
                    .build()
                    .map_err(|e| IndexerError::Config(e.to_string()))?,
            )
        };

        Ok(Self {
            prefixes,
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            overrides,
            files: Vec::new(),
        })
    }

    /// Collect every [`IGNORE_FILE`] under `root`, replacing earlier ones.
    ///
    /// Unreadable or invalid files are logged and skipped.
    pub fn load_ignore_files(&mut self, root: &Path, follow_symlinks: bool) {
        let prefixes = self.prefixes.clone();
        let walk_root = root.to_path_buf();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(follow_symlinks)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if entry.depth() == 0 || !is_dir {
                    return true;
                }
                let rel = entry.path().strip_prefix(&walk_root).unwrap_or(entry.path());
                !has_prefix(&prefixes, rel)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker.flatten() {
            if entry.file_name() != IGNORE_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };

            let mut builder = GitignoreBuilder::new(dir);
            if let Some(e) = builder.add(entry.path()) {
                warn!(file = ?entry.path(), error = %e, "Problem in ignore file");
            }
            match builder.build() {
                Ok(matcher) => {
                    let rel = dir.strip_prefix(root).unwrap_or(Path::new("")).to_path_buf();
                    files.push((rel, matcher));
                }
                Err(e) => warn!(file = ?entry.path(), error = %e, "Skipping ignore file"),
            }
        }

        files.sort_by_key(|(dir, _)| std::cmp::Reverse(dir.components().count()));
        debug!(root = ?root, files = files.len(), "Loaded ignore files");
        self.files = files;
    }

    /// Any path component starts with an ignored prefix.
    pub fn has_ignored_prefix(&self, rel: &Path) -> bool {
        has_prefix(&self.prefixes, rel)
    }

    /// The closest ignore file with an opinion on `rel` decides.
    fn ignored_by_files(&self, rel: &Path, is_dir: bool) -> bool {
        for (dir, matcher) in &self.files {
            let Ok(inner) = rel.strip_prefix(dir) else {
                continue;
            };
            if inner.as_os_str().is_empty() {
                continue;
            }
            let matched = matcher.matched_path_or_any_parents(inner, is_dir);
            if matched.is_ignore() {
                return true;
            }
            if matched.is_whitelist() {
                return false;
            }
        }
        false
    }

    /// The file extension is one of the content extensions.
    pub fn has_content_extension(&self, rel: &Path) -> bool {
        rel.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    /// Full check for a path relative to the content root.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        if self.has_ignored_prefix(rel) || !self.has_content_extension(rel) {
            return true;
        }
        self.overrides
            .as_ref()
            .map(|o| o.matched(rel, false).is_ignore())
            .unwrap_or(false)
            || self.ignored_by_files(rel, false)
    }

    /// Check for a directory relative to the content root.
    pub fn is_ignored_dir(&self, rel: &Path) -> bool {
        self.has_ignored_prefix(rel)
            || self
                .overrides
                .as_ref()
                .map(|o| o.matched(rel, true).is_ignore())
                .unwrap_or(false)
            || self.ignored_by_files(rel, true)
    }
}

fn has_prefix(prefixes: &[String], rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            prefixes.iter().any(|p| name.starts_with(p.as_str()))
        }
        _ => false,
    })
}

/// Retry policy for transient read failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

/// Filesystem-backed document source.
pub struct FsSource {
    root: PathBuf,
    rules: RwLock<Arc<IgnoreRules>>,
    retry: RetryPolicy,
    follow_symlinks: bool,
}

impl FsSource {
    /// Create a source over `root`. The root must exist.
    ///
    /// Ignore files under the root are read here and on
    /// [`DocumentSource::reload_ignores`].
    pub fn new(root: &Path, mut rules: IgnoreRules) -> Result<Self, IndexerError> {
        let root = root
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(root.display().to_string()))?;
        rules.load_ignore_files(&root, false);

        Ok(Self {
            root,
            rules: RwLock::new(Arc::new(rules)),
            retry: RetryPolicy::default(),
            follow_symlinks: false,
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Follow symlinks while walking.
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        if follow {
            let mut rules = IgnoreRules::clone(&self.rules.read());
            rules.load_ignore_files(&self.root, true);
            self.rules = RwLock::new(Arc::new(rules));
        }
        self
    }

    fn rules(&self) -> Arc<IgnoreRules> {
        self.rules.read().clone()
    }

    /// Canonical content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> Result<PathBuf, IndexerError> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(IndexerError::NotFound(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl DocumentSource for FsSource {
    async fn list(&self) -> Result<Vec<SourceEntry>, IndexerError> {
        let walker = Walker::new(&self.root, self.follow_symlinks);
        let root = self.root.clone();
        let rules = self.rules();
        let walk_rules = rules.clone();

        let files = tokio::task::spawn_blocking(move || walker.walk(&walk_rules))
            .await
            .map_err(|e| IndexerError::Storage(format!("walk task failed: {e}")))??;

        let entries: Vec<SourceEntry> = files
            .into_iter()
            .filter_map(|f| {
                let rel = f.path.strip_prefix(&root).ok()?;
                if rules.is_ignored(rel) {
                    return None;
                }
                Some(SourceEntry {
                    path: to_logical(rel),
                    modified: f.modified,
                    size: f.size,
                })
            })
            .collect();

        info!(root = ?self.root, count = entries.len(), "Listed content");
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<SourceDocument, IndexerError> {
        let abs = self.absolute(path)?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.initial_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(self.retry.max_attempts.saturating_sub(1));

        let read = || async {
            let bytes = tokio::fs::read(&abs).await?;
            let modified = tokio::fs::metadata(&abs)
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Ok::<_, std::io::Error>((bytes, modified))
        };

        let result = read
            .retry(backoff)
            .when(is_transient)
            .notify(|e: &std::io::Error, delay: Duration| {
                warn!(path = %path, error = %e, ?delay, "Retrying source read");
            })
            .await;

        match result {
            Ok((bytes, modified)) => {
                debug!(path = %path, size = bytes.len(), "Read source document");
                Ok(SourceDocument {
                    path: path.to_string(),
                    bytes,
                    modified,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(IndexerError::NotFound(path.to_string())),
            Err(e) => Err(IndexerError::SourceRead {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.rules.read().is_ignored(Path::new(path))
    }

    fn is_ignored_dir(&self, path: &str) -> bool {
        self.rules.read().is_ignored_dir(Path::new(path))
    }

    async fn reload_ignores(&self) -> Result<(), IndexerError> {
        let mut rules = IgnoreRules::clone(&self.rules());
        let root = self.root.clone();
        let follow = self.follow_symlinks;

        let rules = tokio::task::spawn_blocking(move || {
            rules.load_ignore_files(&root, follow);
            rules
        })
        .await
        .map_err(|e| IndexerError::Storage(format!("ignore reload failed: {e}")))?;

        *self.rules.write() = Arc::new(rules);
        info!(root = ?self.root, "Reloaded ignore files");
        Ok(())
    }

    fn logical_path(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        Some(to_logical(rel))
    }
}

/// Errors worth another attempt. A vanished or unreadable file is final.
fn is_transient(e: &std::io::Error) -> bool {
    !matches!(
        e.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
    )
}

/// Convert a relative filesystem path to a slash separated logical path.
pub fn to_logical(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
