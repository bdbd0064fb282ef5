//! Per-request query context.

use crate::{QueryError, Result};
use folio_indexer::{CancellationToken, RenderTarget};
use serde::{Deserialize, Serialize};

/// Configured content locales.
///
/// A document's locale is its first path segment when that segment is one
/// of `codes`; otherwise it is `default_locale`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocaleSettings {
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default)]
    pub default_locale: Option<String>,
}

impl LocaleSettings {
    pub fn new(codes: Vec<String>, default_locale: Option<String>) -> Self {
        Self {
            codes,
            default_locale,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.codes.is_empty()
    }

    /// Locale of a logical path.
    pub fn locale_of<'a>(&'a self, path: &str) -> Option<&'a str> {
        let first = path.split('/').next().unwrap_or("");
        // A top-level file is never a locale directory.
        if path.contains('/') {
            if let Some(code) = self.codes.iter().find(|c| c.as_str() == first) {
                return Some(code);
            }
        }
        self.default_locale.as_deref()
    }

    /// Whether `path` belongs to `locale`. Always true without locales.
    pub fn matches(&self, path: &str, locale: Option<&str>) -> bool {
        match locale {
            Some(locale) if self.is_enabled() => self.locale_of(path) == Some(locale),
            _ => true,
        }
    }
}

/// Window into a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginate {
    pub offset: usize,
    pub count: usize,
}

impl Paginate {
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.count).collect()
    }
}

/// Field to sort list results by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Path,
    Title,
    UpdatedAt,
    /// A front matter field
    Meta(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// Options for one query. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub locale: Option<String>,
    pub target: RenderTarget,
    pub paginate: Option<Paginate>,
    /// `None` keeps navigation order
    pub sort_by: Option<SortBy>,
    pub cancel: Option<CancellationToken>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_target(mut self, target: RenderTarget) -> Self {
        self.target = target;
        self
    }

    pub fn paginate(mut self, offset: usize, count: usize) -> Self {
        self.paginate = Some(Paginate { offset, count });
        self
    }

    pub fn sort_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.sort_by = Some(SortBy { key, direction });
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// `Err(Cancelled)` once the caller's token fired.
    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(QueryError::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        match &self.paginate {
            Some(paginate) => paginate.apply(items),
            None => items,
        }
    }
}
