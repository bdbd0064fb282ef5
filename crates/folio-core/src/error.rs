//! Core error types for Folio.

use folio_indexer::IndexerError;
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be read or is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Ingestion, storage or watcher failure
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Work cannot continue
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Whether the watch loop or ingestion must stop on this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Fatal(_) => true,
            CoreError::Indexer(e) => e.is_fatal(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Indexer(IndexerError::Cancelled))
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
