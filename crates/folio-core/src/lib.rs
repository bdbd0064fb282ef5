//! Folio Core Components
//!
//! This crate ties the ingestion engine and the query engine together:
//! configuration loading, the content service that owns every write to the
//! store, and the watch coordinator that turns file changes into reloads.

mod config;
mod coordinator;
mod error;
mod service;

pub use config::{
    ContentConfig, MarkdownConfig, RetryConfig, TocConfig, CONFIG_ENV, CONFIG_FILE,
};
pub use coordinator::{group_of, GroupDebouncer, GroupState, WatchCoordinator};
pub use error::CoreError;
pub use service::{ContentService, IngestReport, ReloadEvent};
