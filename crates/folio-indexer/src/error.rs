//! Indexer error types.

use thiserror::Error;

/// Errors that can occur during ingestion and storage operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logical path does not exist (in the source or in the store)
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Front matter block present but unusable
    #[error("Malformed front matter in {path}: {message}")]
    MalformedFrontMatter { path: String, message: String },

    /// A transform plugin gave up on a document
    #[error("Plugin '{plugin}' failed on {path}: {message}")]
    Plugin {
        plugin: String,
        path: String,
        message: String,
    },

    /// A store write would not advance the version of a path
    #[error("Store write conflict on {path}: version {attempted} does not follow {current}")]
    StoreWriteConflict {
        path: String,
        current: u64,
        attempted: u64,
    },

    /// Reading a source file kept failing after retries
    #[error("Failed to read {path}: {source}")]
    SourceRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Plugin name with no registered factory
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    /// Invalid plugin or source configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Work was cancelled between document units
    #[error("Operation cancelled")]
    Cancelled,
}

impl IndexerError {
    /// Whether this error means the caller's invariant is broken and work must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexerError::StoreWriteConflict { .. })
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}
