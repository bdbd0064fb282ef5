//! Built-in transform plugins.

use super::{Plugin, PluginError, TransformContext};
use crate::node::{ContentNode, CrossRef, Heading, ReadingTime, Toc, TocEntry};
use ignore::WalkBuilder;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Adds anchor ids to headings and records them.
pub struct HeadingsPlugin;

impl Plugin for HeadingsPlugin {
    fn apply(&self, node: &mut ContentNode, _ctx: &TransformContext<'_>) -> Result<(), PluginError> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut headings = Vec::new();

        node.body.walk_mut(&mut |el, nesting| {
            let Some(depth) = el.heading_level() else {
                return;
            };
            let text = el.text();
            let id = match el.props.get("id") {
                Some(id) => id.clone(),
                None => {
                    let base = slugify(&text);
                    let base = if base.is_empty() {
                        "section".to_string()
                    } else {
                        base
                    };
                    let count = seen.entry(base.clone()).or_insert(0);
                    let id = if *count == 0 {
                        base
                    } else {
                        format!("{}-{}", base, count)
                    };
                    *count += 1;
                    el.props.insert("id".to_string(), id.clone());
                    id
                }
            };
            headings.push(Heading {
                id,
                depth,
                text,
                nesting,
            });
        });

        node.computed_fields.headings = headings;
        Ok(())
    }
}

/// Builds a nested table of contents from extracted headings.
///
/// Runs after [`HeadingsPlugin`]; without headings the TOC is empty.
pub struct TocPlugin {
    pub depth: u8,
    pub search_depth: usize,
}

impl TocPlugin {
    /// Read `depth` and `searchDepth` (or `search_depth`) from options.
    pub fn from_options(options: &serde_json::Value, depth: u8, search_depth: usize) -> Self {
        let depth = options
            .get("depth")
            .and_then(|v| v.as_u64())
            .map(|d| d.clamp(1, 6) as u8)
            .unwrap_or(depth);
        let search_depth = options
            .get("searchDepth")
            .or_else(|| options.get("search_depth"))
            .and_then(|v| v.as_u64())
            .map(|d| d.max(1) as usize)
            .unwrap_or(search_depth);
        Self {
            depth,
            search_depth,
        }
    }
}

impl Plugin for TocPlugin {
    fn apply(&self, node: &mut ContentNode, _ctx: &TransformContext<'_>) -> Result<(), PluginError> {
        let mut links: Vec<TocEntry> = Vec::new();

        for heading in &node.computed_fields.headings {
            if heading.depth < 2 || heading.depth > self.depth {
                continue;
            }
            if heading.nesting >= self.search_depth {
                continue;
            }
            let entry = TocEntry {
                id: heading.id.clone(),
                depth: heading.depth,
                text: heading.text.clone(),
                children: Vec::new(),
            };
            insert_toc_entry(&mut links, entry);
        }

        node.computed_fields.toc = Some(Toc {
            depth: self.depth,
            search_depth: self.search_depth,
            links,
        });
        Ok(())
    }
}

/// Nest `entry` under the last shallower entry of its chain.
fn insert_toc_entry(entries: &mut Vec<TocEntry>, entry: TocEntry) {
    match entries.last_mut() {
        Some(last) if last.depth < entry.depth => insert_toc_entry(&mut last.children, entry),
        _ => entries.push(entry),
    }
}

/// Word count and estimated reading minutes.
pub struct ReadingTimePlugin {
    pub words_per_minute: usize,
}

impl Default for ReadingTimePlugin {
    fn default() -> Self {
        Self {
            words_per_minute: 200,
        }
    }
}

impl Plugin for ReadingTimePlugin {
    fn apply(&self, node: &mut ContentNode, _ctx: &TransformContext<'_>) -> Result<(), PluginError> {
        if self.words_per_minute == 0 {
            return Err(PluginError::new("words_per_minute must be positive"));
        }
        let words = node.body.plain_text().split_whitespace().count();
        let minutes = words.div_ceil(self.words_per_minute);
        node.computed_fields.reading_time = Some(ReadingTime { words, minutes });
        Ok(())
    }
}

/// Rewrites relative links between documents to their routes.
///
/// `./guide.md#setup` in `docs/intro.md` becomes `/docs/guide#setup`.
pub struct CrossReferencePlugin;

impl Plugin for CrossReferencePlugin {
    fn apply(&self, node: &mut ContentNode, _ctx: &TransformContext<'_>) -> Result<(), PluginError> {
        let base = node.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let mut links = Vec::new();

        node.body.walk_mut(&mut |el, _| {
            if el.tag != "a" {
                return;
            }
            let Some(href) = el.props.get("href").cloned() else {
                return;
            };
            let Some(target) = resolve_link(base, &href) else {
                return;
            };
            let fragment = href.split_once('#').map(|(_, f)| f);
            let mut route = route_for(&target);
            if let Some(fragment) = fragment {
                route.push('#');
                route.push_str(fragment);
            }
            el.props.insert("href".to_string(), route);
            links.push(CrossRef { href, target });
        });

        node.computed_fields.links = links;
        Ok(())
    }
}

/// Resolve a relative markdown link against the directory of its document.
fn resolve_link(base_dir: &str, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') || href.starts_with('/') || href.contains("://") {
        return None;
    }
    if href.starts_with("mailto:") || href.starts_with("tel:") {
        return None;
    }

    let file = href.split(['#', '?']).next().unwrap_or("");
    if !(file.ends_with(".md") || file.ends_with(".markdown")) {
        return None;
    }

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in file.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                // Links above the content root are left as written.
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Public route of a logical path: extension dropped, `index` folded.
pub fn route_for(path: &str) -> String {
    let stem = path
        .strip_suffix(".md")
        .or_else(|| path.strip_suffix(".markdown"))
        .unwrap_or(path);
    let stem = stem
        .strip_suffix("/index")
        .or_else(|| (stem == "index").then_some(""))
        .unwrap_or(stem);
    format!("/{}", stem)
}

/// Tags produced by the markdown parser or otherwise plain HTML.
const HTML_TAGS: &[&str] = &[
    "a", "blockquote", "br", "code", "del", "div", "em", "footnote", "h1", "h2", "h3", "h4", "h5",
    "h6", "hr", "img", "input", "li", "math", "ol", "p", "pre", "span", "strong", "sub", "sup",
    "table", "tbody", "td", "th", "thead", "tr", "ul",
];

/// Resolves component references against component directories.
///
/// Custom element tags are looked up by kebab-case name. A `props` element
/// refers to the component named by its `of` attribute. Resolved elements
/// get a `component` prop with the file path; the rest are marked
/// `unresolved`.
pub struct PropsPlugin {
    index: HashMap<String, PathBuf>,
}

impl PropsPlugin {
    /// Index component files found under `paths`. Earlier paths win.
    pub fn new(paths: &[PathBuf]) -> Self {
        let mut index = HashMap::new();
        for dir in paths {
            index_components(dir, &mut index);
        }
        debug!(components = index.len(), dirs = paths.len(), "Indexed components");
        Self { index }
    }

    /// Read `paths` from plugin options.
    pub fn from_options(options: &serde_json::Value) -> Self {
        let paths: Vec<PathBuf> = options
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(PathBuf::from))
                    .collect()
            })
            .unwrap_or_default();
        Self::new(&paths)
    }

    /// Resolve a component name.
    pub fn resolve(&self, name: &str) -> Option<&Path> {
        self.index.get(&kebab_case(name)).map(PathBuf::as_path)
    }
}

impl Plugin for PropsPlugin {
    fn apply(&self, node: &mut ContentNode, _ctx: &TransformContext<'_>) -> Result<(), PluginError> {
        node.body.try_walk_mut(&mut |el, _| {
            let name = if el.tag == "props" {
                el.props
                    .get("of")
                    .cloned()
                    .ok_or_else(|| PluginError::new("props component requires an `of` attribute"))?
            } else if HTML_TAGS.contains(&el.tag.as_str()) {
                return Ok(());
            } else {
                el.tag.clone()
            };

            match self.resolve(&name) {
                Some(path) => {
                    el.props
                        .insert("component".to_string(), path.display().to_string());
                    el.props.remove("unresolved");
                }
                None => {
                    el.props.insert("unresolved".to_string(), "true".to_string());
                }
            }
            Ok(())
        })
    }
}

const COMPONENT_EXTENSIONS: &[&str] = &["vue", "js", "ts", "jsx", "tsx", "svelte"];

fn index_components(dir: &Path, index: &mut HashMap<String, PathBuf>) {
    let walker = WalkBuilder::new(dir).standard_filters(true).build();
    for entry in walker.flatten() {
        let path = entry.path();
        let is_component = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| COMPONENT_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if !is_component {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        // `Alert.vue` answers to `alert`; `base/Button.vue` also to `base-button`.
        let mut names = vec![kebab_case(stem)];
        if let Ok(rel) = path.strip_prefix(dir) {
            let prefix: Vec<String> = rel
                .parent()
                .map(|p| {
                    p.components()
                        .map(|c| kebab_case(&c.as_os_str().to_string_lossy()))
                        .collect()
                })
                .unwrap_or_default();
            if !prefix.is_empty() {
                names.push(format!("{}-{}", prefix.join("-"), kebab_case(stem)));
            }
        }
        for name in names {
            index.entry(name).or_insert_with(|| path.to_path_buf());
        }
    }
}

/// `AlertBox`, `alert_box` and `alert-box` all become `alert-box`.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower && !out.ends_with('-') {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out.trim_matches('-').to_string()
}

/// Anchor slug: lowercase alphanumerics joined by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Names of the built-in plugins, in their default order.
pub const PARSE_DEFAULTS: &[&str] = &["headings", "toc", "reading-time", "cross-references"];

/// Deduplicated list of directory paths.
pub(crate) fn merge_paths(existing: &mut Vec<String>, extra: &[PathBuf]) {
    let mut seen: HashSet<String> = existing.iter().cloned().collect();
    for path in extra {
        let path = path.display().to_string();
        if seen.insert(path.clone()) {
            existing.push(path);
        }
    }
}
