//! Configuration for Folio content ingestion.

use crate::CoreError;
use folio_indexer::pipeline::plugins::PARSE_DEFAULTS;
use folio_indexer::{
    FsSource, IgnoreRules, Pipeline, PipelineBuilder, PluginDescriptor, PluginTarget, RetryPolicy,
    StoreBackend,
};
use folio_query::LocaleSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Config file looked up in the working directory
pub const CONFIG_FILE: &str = "folio.yaml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "FOLIO_CONFIG";

/// Content configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Root of the markdown tree
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// File extensions treated as documents
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Gitignore-style patterns relative to the content root
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Name prefixes that hide a file or directory
    #[serde(default = "default_ignore_prefixes")]
    pub ignore_prefixes: Vec<String>,

    /// Follow symlinks while walking the content root
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Watch the content root and reingest on change
    #[serde(default = "default_watch")]
    pub watch: bool,

    /// Debounce window per directory, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Documents ingested concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default)]
    pub store: StoreBackend,

    #[serde(default)]
    pub locales: LocaleSettings,

    #[serde(default)]
    pub markdown: MarkdownConfig,

    /// Retries for transient source reads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Markdown transform settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkdownConfig {
    #[serde(default)]
    pub toc: TocConfig,

    /// Plugins in registration order. Naming a built-in parse plugin
    /// replaces its default registration in place.
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,

    /// Extra search paths for the `props` plugin
    #[serde(default)]
    pub component_dirs: Vec<PathBuf>,

    /// Directory scanned for `components` folders
    #[serde(default)]
    pub components_root: Option<PathBuf>,
}

/// Table of contents settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocConfig {
    /// Deepest heading level listed
    #[serde(default = "default_toc_depth")]
    pub depth: u8,

    /// Maximum nesting of entries
    #[serde(default = "default_toc_search_depth", alias = "searchDepth")]
    pub search_depth: usize,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            depth: default_toc_depth(),
            search_depth: default_toc_search_depth(),
        }
    }
}

/// Retry settings for source reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}

fn default_ignore_prefixes() -> Vec<String> {
    vec![".".to_string(), "-".to_string()]
}

fn default_watch() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_toc_depth() -> u8 {
    3
}

fn default_toc_search_depth() -> usize {
    2
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    20
}

fn default_max_delay_ms() -> u64 {
    500
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            extensions: default_extensions(),
            ignore: Vec::new(),
            ignore_prefixes: default_ignore_prefixes(),
            follow_symlinks: false,
            watch: default_watch(),
            debounce_ms: default_debounce_ms(),
            parallelism: default_parallelism(),
            store: StoreBackend::default(),
            locales: LocaleSettings::default(),
            markdown: MarkdownConfig::default(),
            retry: RetryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl ContentConfig {
    /// Load configuration, falling back to defaults.
    ///
    /// Looks at `$FOLIO_CONFIG`, then `./folio.yaml`, then the user config
    /// directory.
    pub fn load() -> Self {
        for path in config_candidates() {
            if !path.exists() {
                continue;
            }
            match Self::load_from(&path) {
                Ok(config) => {
                    debug!(path = ?path, "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to load config file, using defaults");
                    return Self::default();
                }
            }
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            warn!(path = %path, "Config file named by {} does not exist", CONFIG_ENV);
        }
        Self::default()
    }

    /// Load configuration from a specific path.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(content: &str) -> Result<Self, CoreError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.extensions.is_empty() {
            return Err(CoreError::Config("extensions must not be empty".to_string()));
        }
        if self.parallelism == 0 {
            return Err(CoreError::Config("parallelism must be at least 1".to_string()));
        }
        if self.debounce_ms == 0 {
            return Err(CoreError::Config("debounce_ms must be positive".to_string()));
        }
        if !(1..=6).contains(&self.markdown.toc.depth) {
            return Err(CoreError::Config(format!(
                "markdown.toc.depth must be between 1 and 6, got {}",
                self.markdown.toc.depth
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if let Some(default) = &self.locales.default_locale {
            if self.locales.is_enabled() && !self.locales.codes.contains(default) {
                return Err(CoreError::Config(format!(
                    "default locale '{}' is not one of the configured codes",
                    default
                )));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        self.content_dir = resolve(&self.content_dir);
        self.markdown.component_dirs = self
            .markdown
            .component_dirs
            .iter()
            .map(|p| resolve(p))
            .collect();
        self.markdown.components_root = self.markdown.components_root.as_deref().map(resolve);
        if let StoreBackend::File { dir: Some(dir) } = &mut self.store {
            *dir = resolve(dir);
        }
    }

    /// Debounce window for the watch coordinator.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms.max(self.retry.initial_delay_ms)),
        }
    }

    /// Ignore list for the content root.
    pub fn ignore_rules(&self) -> Result<IgnoreRules, CoreError> {
        Ok(IgnoreRules::new(
            &self.content_dir,
            self.ignore_prefixes.clone(),
            self.extensions.clone(),
            &self.ignore,
        )?)
    }

    /// Filesystem source over the content root.
    pub fn source(&self) -> Result<FsSource, CoreError> {
        let source = FsSource::new(&self.content_dir, self.ignore_rules()?)
            .map_err(|_| {
                CoreError::Config(format!(
                    "content directory {} does not exist",
                    self.content_dir.display()
                ))
            })?
            .with_retry(self.retry_policy())
            .with_follow_symlinks(self.follow_symlinks);
        Ok(source)
    }

    /// Build the transform pipeline.
    ///
    /// Built-in parse plugins come first in their default order; a configured
    /// descriptor with the same name takes that slot. Remaining descriptors
    /// follow in configuration order.
    pub fn pipeline(&self) -> Result<Pipeline, CoreError> {
        let toc = self.markdown.toc;
        let mut builder = PipelineBuilder::new().toc_defaults(toc.depth, toc.search_depth);

        let configured = &self.markdown.plugins;
        for name in PARSE_DEFAULTS {
            match configured.iter().find(|d| d.name == *name) {
                Some(descriptor) => builder.register(descriptor.clone())?,
                None => builder.register(PluginDescriptor::new(*name, PluginTarget::Parse))?,
            };
        }
        for descriptor in configured
            .iter()
            .filter(|d| !PARSE_DEFAULTS.contains(&d.name.as_str()))
        {
            builder.register(descriptor.clone())?;
        }

        let mut component_dirs = self.markdown.component_dirs.clone();
        if let Some(root) = &self.markdown.components_root {
            component_dirs.extend(PipelineBuilder::discover_component_dirs(root));
        }
        if !component_dirs.is_empty() {
            builder.extend_search_paths("props", &component_dirs)?;
        }

        Ok(builder.build()?)
    }
}

fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(PathBuf::from(CONFIG_FILE));
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("folio").join(CONFIG_FILE));
    }
    candidates
}
