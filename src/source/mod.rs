//! Remote providers and their record mappings.
//!
//! # Architecture
//!
//! - [`Source`] - Async trait each provider implements: fetch one page, screen
//!   raw items, map raw items to [`NormalizedRecord`]s
//! - [`HfModelsSource`] - HuggingFace Hub model search (token cursor)
//! - [`ArxivSource`] - arXiv Atom API search (offset cursor, date screen)
//! - [`HfDailyPapersSource`] - HuggingFace daily papers (offset cursor, keyword screen)
//! - [`EdgarEntitiesSource`] - SEC ticker directory (single document)
//! - [`EdgarFilingsSource`] - EDGAR full-text search (offset cursor)
//! - [`EdgarFactsSource`] - EDGAR XBRL company facts (single document)
//!
//! Mappings are pure functions of one raw item, so they are trivially testable
//! without a network.

mod arxiv;
mod edgar_entities;
mod edgar_facts;
mod edgar_filings;
mod feed;
mod hf_models;
mod hf_papers;

pub use arxiv::ArxivSource;
pub use edgar_entities::EdgarEntitiesSource;
pub use edgar_facts::EdgarFactsSource;
pub use edgar_filings::EdgarFilingsSource;
pub use feed::{FeedEntry, FeedLink, parse_atom_feed};
pub use hf_models::HfModelsSource;
pub use hf_papers::HfDailyPapersSource;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{Filters, Mode};
use crate::paginate::PageCursor;
use crate::record::NormalizedRecord;
use crate::transport::{RetryingTransport, TransportError};

/// One item as the provider returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    /// A JSON object (HuggingFace, EDGAR).
    Json(serde_json::Value),
    /// An Atom feed entry (arXiv).
    Feed(FeedEntry),
}

impl RawItem {
    /// Returns the JSON value, if this is a JSON item.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Feed(_) => None,
        }
    }
}

/// One provider page before screening.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// Items in provider order.
    pub items: Vec<RawItem>,
    /// Continuation token for the following page (token sources only).
    pub next_token: Option<String>,
    /// Total result count reported by the provider, if any.
    pub total_hint: Option<u64>,
}

/// Per-item screening outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemVerdict {
    /// Emit the item.
    Keep,
    /// Drop the item; keep reading the page.
    Skip,
    /// Drop the item and everything after it; traversal is over.
    Stop,
}

/// A raw item that cannot be mapped to a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// A required field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The item is not the shape this mapping expects.
    #[error("unexpected item shape: expected {0}")]
    UnexpectedShape(&'static str),
}

/// A paginated remote provider.
///
/// This trait uses `async_trait` so controllers can hold a `Box<dyn Source>`
/// chosen at runtime from the configured [`Mode`].
#[async_trait]
pub trait Source: Send + Sync {
    /// The mode this source serves.
    fn mode(&self) -> Mode;

    /// Items per remote page.
    fn page_size(&self) -> u32;

    /// Deepest offset the provider will serve, if limited.
    fn max_depth(&self) -> Option<u64> {
        None
    }

    /// Cursor of the first page.
    fn initial_cursor(&self) -> PageCursor {
        PageCursor::offset(0)
    }

    /// Whether [`Source::screen`] may drop items for these filters.
    fn screens(&self, _filters: &Filters) -> bool {
        false
    }

    /// Fetches at most `limit` items at `cursor`.
    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        filters: &Filters,
    ) -> Result<RawPage, TransportError>;

    /// Client-side filter applied to each item in provider order.
    fn screen(&self, _item: &RawItem, _filters: &Filters) -> ItemVerdict {
        ItemVerdict::Keep
    }

    /// Maps one raw item to its normalized record.
    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError>;
}

/// Builds the production source for `mode`.
#[must_use]
pub fn source_for(mode: Mode) -> Box<dyn Source> {
    match mode {
        Mode::SearchModels => Box::new(HfModelsSource::new()),
        Mode::SearchPapers => Box::new(ArxivSource::new()),
        Mode::TrendingPapers => Box::new(HfDailyPapersSource::new()),
        Mode::CompanySearch => Box::new(EdgarEntitiesSource::new()),
        Mode::FilingSearch => Box::new(EdgarFilingsSource::new()),
        Mode::CompanyFacts => Box::new(EdgarFactsSource::new()),
    }
}

/// Builds the source for `mode` against a custom base URL (mock servers, mirrors).
#[must_use]
pub fn source_with_base_url(mode: Mode, base_url: &str) -> Box<dyn Source> {
    match mode {
        Mode::SearchModels => Box::new(HfModelsSource::with_base_url(base_url)),
        Mode::SearchPapers => Box::new(ArxivSource::with_base_url(base_url)),
        Mode::TrendingPapers => Box::new(HfDailyPapersSource::with_base_url(base_url)),
        Mode::CompanySearch => Box::new(EdgarEntitiesSource::with_base_url(base_url)),
        Mode::FilingSearch => Box::new(EdgarFilingsSource::with_base_url(base_url)),
        Mode::CompanyFacts => Box::new(EdgarFactsSource::with_base_url(base_url)),
    }
}

/// Collapses runs of whitespace (including newlines) to single spaces.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads a string field, treating blanks as absent.
pub(crate) fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads an array of strings, ignoring non-string entries.
pub(crate) fn str_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Keeps the `YYYY-MM-DD` prefix of a timestamp.
pub(crate) fn date_prefix(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}

/// One downloaded document, shared by every page of a single-document source.
///
/// The slot is keyed by URL so a source reused with different filters never
/// serves a stale document.
#[derive(Debug)]
pub(crate) struct DocumentCache<T> {
    slot: Mutex<Option<(String, Arc<T>)>>,
}

impl<T> Default for DocumentCache<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T: Send + Sync> DocumentCache<T> {
    /// Returns the cached document for `url`, downloading it on first use.
    pub(crate) async fn get_or_fetch<F, Fut>(
        &self,
        url: &str,
        fetch: F,
    ) -> Result<Arc<T>, TransportError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, TransportError>> + Send,
    {
        let mut slot = self.slot.lock().await;
        if let Some((cached_url, document)) = slot.as_ref()
            && cached_url == url
        {
            return Ok(Arc::clone(document));
        }

        debug!(url, "downloading document");
        let document = Arc::new(fetch().await?);
        *slot = Some((url.to_string(), Arc::clone(&document)));
        Ok(document)
    }
}

/// Slices one offset page out of an in-memory list.
pub(crate) fn slice_page<T: Clone>(items: &[T], cursor: &PageCursor, limit: u32) -> Vec<T> {
    let start = usize::try_from(cursor.offset_value().unwrap_or(0)).unwrap_or(usize::MAX);
    items
        .iter()
        .skip(start)
        .take(limit as usize)
        .cloned()
        .collect()
}
