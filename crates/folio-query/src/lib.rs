//! Folio Query
//!
//! Read side of the content core: fetch one document, list with filters,
//! ranked full-text search and the navigation tree. Every operation reads a
//! single store snapshot and honors the caller's [`QueryContext`].

mod context;
mod engine;
mod error;
mod filter;
pub mod search;

pub use context::{LocaleSettings, Paginate, QueryContext, SortBy, SortDirection, SortKey};
pub use engine::{QueryEngine, SearchHit};
pub use error::{QueryError, Result};
pub use filter::{Filter, Predicate};
