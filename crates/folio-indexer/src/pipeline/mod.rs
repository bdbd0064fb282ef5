//! Transform pipeline.
//!
//! A [`PipelineBuilder`] collects plugin descriptors in registration order and
//! closes into an immutable [`Pipeline`]. Parse-time plugins run once per
//! ingestion and their results are stored with the node; render-time plugins
//! run on every read for the caller's target and are never stored.

pub mod markdown;
pub mod plugins;

use crate::frontmatter;
use crate::node::ContentNode;
use crate::IndexerError;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use plugins::{
    CrossReferencePlugin, HeadingsPlugin, PropsPlugin, ReadingTimePlugin, TocPlugin,
    PARSE_DEFAULTS,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// When a plugin runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTarget {
    /// Once per ingestion; output cached on the node
    Parse,
    /// Per read, server target only
    Server,
    /// Per read, client target only
    Client,
    /// Per read, every target
    Render,
}

impl PluginTarget {
    pub fn is_parse_time(self) -> bool {
        self == PluginTarget::Parse
    }

    /// Whether a render-time plugin with this target runs for `target`.
    pub fn applies_to(self, target: RenderTarget) -> bool {
        match self {
            PluginTarget::Parse => false,
            PluginTarget::Render => true,
            PluginTarget::Server => target == RenderTarget::Server,
            PluginTarget::Client => target == RenderTarget::Client,
        }
    }
}

/// The consumer a document is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    #[default]
    Server,
    Client,
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Server => write!(f, "server"),
            RenderTarget::Client => write!(f, "client"),
        }
    }
}

/// A plugin registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default = "default_target")]
    pub target: PluginTarget,
    /// Passed to the plugin factory as-is
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_target() -> PluginTarget {
    PluginTarget::Parse
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, target: PluginTarget) -> Self {
        Self {
            name: name.into(),
            target,
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Per-invocation information handed to plugins.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub path: &'a str,
    /// `None` during parse-time processing
    pub target: Option<RenderTarget>,
    pub locale: Option<&'a str>,
}

impl<'a> TransformContext<'a> {
    pub fn parse(path: &'a str) -> Self {
        Self {
            path,
            target: None,
            locale: None,
        }
    }

    pub fn render(path: &'a str, target: RenderTarget) -> Self {
        Self {
            path,
            target: Some(target),
            locale: None,
        }
    }

    pub fn with_locale(mut self, locale: Option<&'a str>) -> Self {
        self.locale = locale;
        self
    }
}

/// A plugin gave up on one document.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A transform step over a content node.
pub trait Plugin: Send + Sync {
    fn apply(&self, node: &mut ContentNode, ctx: &TransformContext<'_>)
        -> Result<(), PluginError>;
}

struct Registration {
    descriptor: PluginDescriptor,
    custom: Option<Arc<dyn Plugin>>,
}

/// Open plugin registry. Closed by [`PipelineBuilder::build`].
pub struct PipelineBuilder {
    registrations: Vec<Registration>,
    toc_depth: u8,
    toc_search_depth: usize,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            toc_depth: 3,
            toc_search_depth: 2,
        }
    }

    /// A registry preloaded with the built-in parse-time plugins.
    pub fn with_defaults() -> Self {
        let mut builder = Self::new();
        for name in PARSE_DEFAULTS {
            builder.registrations.push(Registration {
                descriptor: PluginDescriptor::new(*name, PluginTarget::Parse),
                custom: None,
            });
        }
        builder
    }

    /// TOC settings used when a `toc` descriptor has no options of its own.
    pub fn toc_defaults(mut self, depth: u8, search_depth: usize) -> Self {
        self.toc_depth = depth.clamp(1, 6);
        self.toc_search_depth = search_depth.max(1);
        self
    }

    /// Register a built-in plugin by descriptor.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<&mut Self, IndexerError> {
        if !is_builtin(&descriptor.name) {
            return Err(IndexerError::UnknownPlugin(descriptor.name));
        }
        debug!(plugin = %descriptor.name, target = ?descriptor.target, "Registered plugin");
        self.registrations.push(Registration {
            descriptor,
            custom: None,
        });
        Ok(self)
    }

    /// Register a caller-provided plugin.
    pub fn register_custom(
        &mut self,
        descriptor: PluginDescriptor,
        plugin: Arc<dyn Plugin>,
    ) -> &mut Self {
        debug!(plugin = %descriptor.name, target = ?descriptor.target, "Registered custom plugin");
        self.registrations.push(Registration {
            descriptor,
            custom: Some(plugin),
        });
        self
    }

    /// Append directories to the `paths` option of every registration named
    /// `name`, registering a server-target one if none exists yet.
    pub fn extend_search_paths(
        &mut self,
        name: &str,
        dirs: &[PathBuf],
    ) -> Result<&mut Self, IndexerError> {
        if !self.registrations.iter().any(|r| r.descriptor.name == name) {
            self.register(PluginDescriptor::new(name, PluginTarget::Server))?;
        }

        for registration in self
            .registrations
            .iter_mut()
            .filter(|r| r.descriptor.name == name)
        {
            let options = &mut registration.descriptor.options;
            if options.is_null() {
                *options = serde_json::json!({});
            }
            let map = options.as_object_mut().ok_or_else(|| {
                IndexerError::Config(format!("options of plugin '{}' must be a map", name))
            })?;

            let mut paths: Vec<String> = match map.get("paths") {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                Some(serde_json::Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(IndexerError::Config(format!(
                        "'paths' of plugin '{}' must be a list",
                        name
                    )))
                }
            };
            plugins::merge_paths(&mut paths, dirs);
            map.insert("paths".to_string(), serde_json::json!(paths));
        }
        Ok(self)
    }

    /// Find `components` directories below `root`, sorted.
    pub fn discover_component_dirs(root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root)
            .standard_filters(true)
            .filter_entry(|entry| entry.file_name() != "node_modules")
            .build();

        let mut dirs: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .filter(|entry| entry.file_name() == "components")
            .map(|entry| entry.into_path())
            .collect();
        dirs.sort();
        dirs
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.registrations.iter().map(|r| &r.descriptor)
    }

    /// Instantiate every plugin and close the registry.
    pub fn build(self) -> Result<Pipeline, IndexerError> {
        let mut parse = Vec::new();
        let mut render = Vec::new();

        for Registration { descriptor, custom } in self.registrations {
            let plugin = match custom {
                Some(plugin) => plugin,
                None => instantiate(&descriptor, self.toc_depth, self.toc_search_depth)?,
            };
            let stage = Stage { descriptor, plugin };
            if stage.descriptor.target.is_parse_time() {
                parse.push(stage);
            } else {
                render.push(stage);
            }
        }

        info!(
            parse = parse.len(),
            render = render.len(),
            "Transform pipeline ready"
        );

        Ok(Pipeline { parse, render })
    }
}

fn is_builtin(name: &str) -> bool {
    PARSE_DEFAULTS.contains(&name) || name == "props"
}

fn instantiate(
    descriptor: &PluginDescriptor,
    toc_depth: u8,
    toc_search_depth: usize,
) -> Result<Arc<dyn Plugin>, IndexerError> {
    let options = &descriptor.options;
    let plugin: Arc<dyn Plugin> = match descriptor.name.as_str() {
        "headings" => Arc::new(HeadingsPlugin),
        "toc" => Arc::new(TocPlugin::from_options(options, toc_depth, toc_search_depth)),
        "reading-time" => {
            let words_per_minute = options
                .get("words_per_minute")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(200);
            if words_per_minute == 0 {
                return Err(IndexerError::Config(
                    "reading-time words_per_minute must be positive".to_string(),
                ));
            }
            Arc::new(ReadingTimePlugin { words_per_minute })
        }
        "cross-references" => Arc::new(CrossReferencePlugin),
        "props" => Arc::new(PropsPlugin::from_options(options)),
        other => return Err(IndexerError::UnknownPlugin(other.to_string())),
    };
    Ok(plugin)
}

struct Stage {
    descriptor: PluginDescriptor,
    plugin: Arc<dyn Plugin>,
}

/// Closed, ordered plugin list.
pub struct Pipeline {
    parse: Vec<Stage>,
    render: Vec<Stage>,
}

impl Pipeline {
    /// Turn raw source bytes into a node.
    ///
    /// Never fails: unreadable front matter or a failing parse-time plugin
    /// produce a degraded node instead.
    pub fn process(&self, path: &str, bytes: &[u8], modified: DateTime<Utc>) -> ContentNode {
        let text = String::from_utf8_lossy(bytes);
        let mut node = ContentNode::new(path, content_hash(bytes));
        node.modified = modified;

        let fm = match frontmatter::split(path, &text) {
            Ok(fm) => fm,
            Err(e) => {
                warn!(path = %path, error = %e, "Storing document with raw body");
                node.degrade(&text, e.to_string());
                return node;
            }
        };

        node.raw_metadata = fm.metadata;
        node.body = markdown::parse_body(&fm.body);

        let metadata = node.raw_metadata.clone();
        let ctx = TransformContext::parse(path);
        for stage in &self.parse {
            if let Err(e) = stage.plugin.apply(&mut node, &ctx) {
                warn!(
                    path = %path,
                    plugin = %stage.descriptor.name,
                    error = %e,
                    "Plugin failed, storing document with raw body"
                );
                node.raw_metadata = metadata;
                node.degrade(
                    &fm.body,
                    format!("plugin '{}' failed: {}", stage.descriptor.name, e),
                );
                return node;
            }
        }

        node
    }

    /// Apply the render-time plugins for `ctx.target` to a copy of `node`.
    pub fn render(
        &self,
        node: &ContentNode,
        ctx: &TransformContext<'_>,
    ) -> Result<ContentNode, IndexerError> {
        let target = ctx.target.unwrap_or_default();
        let mut rendered = node.clone();
        for stage in self.render.iter().filter(|s| s.descriptor.target.applies_to(target)) {
            stage
                .plugin
                .apply(&mut rendered, ctx)
                .map_err(|e| IndexerError::Plugin {
                    plugin: stage.descriptor.name.clone(),
                    path: node.path.clone(),
                    message: e.message,
                })?;
        }
        Ok(rendered)
    }

    /// Whether any render-time plugin runs for `target`.
    pub fn has_render_plugins(&self, target: RenderTarget) -> bool {
        self.render
            .iter()
            .any(|s| s.descriptor.target.applies_to(target))
    }

    /// Descriptors in execution order, parse-time first.
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.parse.iter().chain(&self.render).map(|s| &s.descriptor)
    }
}

/// SHA-256 of the raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
