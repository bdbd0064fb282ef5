//! Folio Indexer
//!
//! This crate provides the ingestion engine for Folio, including:
//! - Content discovery with ignore-list support and retried reads
//! - Front matter extraction and markdown body parsing
//! - An ordered, closed pipeline of parse-time and render-time plugins
//! - Content stores (in-memory and persistent) with snapshot reads
//! - Incremental navigation tree building
//! - File watching with per-path change coalescing

pub mod cancel;
mod error;
pub mod frontmatter;
pub mod node;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod tree;
pub mod watcher;

pub use cancel::CancellationToken;
pub use error::IndexerError;
pub use node::{Body, BodyNode, ComputedFields, ContentNode, Element, MetaValue, Metadata, NodeStatus};
pub use pipeline::{
    content_hash, Pipeline, PipelineBuilder, Plugin, PluginDescriptor, PluginError, PluginTarget,
    RenderTarget, TransformContext,
};
pub use source::{
    DocumentSource, FsSource, IgnoreRules, RetryPolicy, SourceDocument, SourceEntry, IGNORE_FILE,
};
pub use storage::{
    open_store, ContentStore, FileStore, MemoryStore, PutOutcome, StoreBackend, StoreSnapshot,
};
pub use tree::{NavOrder, NavigationBuilder, NavigationEntry};
pub use watcher::{ChangeBatcher, ChangeKind, FileChange, FileWatcher, WatcherOptions};
