//! Error types for queries.

use folio_indexer::IndexerError;
use thiserror::Error;

/// Errors that can occur while answering a query.
///
/// Queries never fail because of the state of other documents; a missing
/// path or a cancelled request are the only expected failures.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Path not present in the store
    #[error("Content not found: {0}")]
    NotFound(String),

    /// The caller cancelled the request
    #[error("Query cancelled")]
    Cancelled,

    /// Store or index failure
    #[error("Index error: {0}")]
    Index(String),
}

impl From<IndexerError> for QueryError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::NotFound(path) => QueryError::NotFound(path),
            IndexerError::Cancelled => QueryError::Cancelled,
            other => QueryError::Index(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
