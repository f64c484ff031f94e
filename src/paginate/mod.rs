//! Paged traversal of a remote listing under a result budget.
//!
//! A [`Paginator`] turns one [`PageCursor`] into one [`Page`]: it gates the
//! request through the transport, applies the source's screening, truncates
//! at the effective cap and decides whether another page exists. Cursors are
//! plain data, so traversal can restart from any cursor previously observed.
//!
//! # Termination
//!
//! The first condition to trigger wins:
//! - the remote signals the end (short or empty page, no next token, count reached)
//! - the effective cap is reached; the page is truncated at the cap boundary
//! - the source screens an item as the logical end of results
//! - the provider's maximum pagination depth is reached

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::{Filters, RequestBudget};
use crate::source::{ItemVerdict, RawItem, Source};
use crate::transport::{RetryingTransport, TransportError};

/// Position in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageCursor {
    /// Zero-based item offset.
    Offset {
        /// Index of the next item to fetch.
        offset: u64,
    },
    /// Continuation token, plus items of that page already consumed.
    Token {
        /// Provider token; `None` addresses the first page.
        token: Option<String>,
        /// Items at the start of the token's page to drop on refetch.
        skip: u32,
    },
}

impl PageCursor {
    /// Cursor at `offset`.
    #[must_use]
    pub fn offset(offset: u64) -> Self {
        Self::Offset { offset }
    }

    /// Cursor addressing the first page of a token listing.
    #[must_use]
    pub fn first_token() -> Self {
        Self::Token {
            token: None,
            skip: 0,
        }
    }

    /// The offset value for offset cursors.
    #[must_use]
    pub fn offset_value(&self) -> Option<u64> {
        match self {
            Self::Offset { offset } => Some(*offset),
            Self::Token { .. } => None,
        }
    }

    /// The continuation token for token cursors.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token { token, .. } => token.as_deref(),
            Self::Offset { .. } => None,
        }
    }

    /// Items of the addressed page that were already consumed.
    #[must_use]
    pub fn skip(&self) -> usize {
        match self {
            Self::Offset { .. } => 0,
            Self::Token { skip, .. } => *skip as usize,
        }
    }

    /// Cursor that resumes right after the item at `index` of the page this cursor fetched.
    #[must_use]
    pub fn after_item(&self, index: usize) -> Self {
        match self {
            Self::Offset { offset } => Self::Offset {
                offset: offset + index as u64 + 1,
            },
            Self::Token { token, .. } => Self::Token {
                token: token.clone(),
                skip: u32::try_from(index + 1).unwrap_or(u32::MAX),
            },
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Offset { .. }, Self::Offset { .. }) | (Self::Token { .. }, Self::Token { .. })
        )
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset { offset } => write!(f, "offset {offset}"),
            Self::Token { token: None, skip } => write!(f, "first page (+{skip})"),
            Self::Token {
                token: Some(token),
                skip,
            } => write!(f, "token {token} (+{skip})"),
        }
    }
}

/// Why traversal stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The remote has no more items.
    Exhausted,
    /// The effective result cap was reached.
    CapReached,
    /// A source screen marked the logical end of results.
    Filtered,
    /// An empty page arrived although the remote reported more results.
    InconsistentPage,
    /// The provider does not page past this depth.
    DepthLimit,
}

impl StopReason {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::CapReached => "cap_reached",
            Self::Filtered => "filtered",
            Self::InconsistentPage => "inconsistent_page",
            Self::DepthLimit => "depth_limit",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One item kept from a page, with the cursor that resumes after it.
#[derive(Debug, Clone)]
pub struct PagedItem {
    pub item: RawItem,
    pub resume_at: PageCursor,
}

/// One page of kept items.
#[derive(Debug, Clone)]
pub struct Page {
    /// Kept items in provider order.
    pub items: Vec<PagedItem>,
    /// Cursor of the following page; `None` when traversal is over.
    pub next: Option<PageCursor>,
    /// Cursor resuming after every item this page examined.
    pub position: PageCursor,
    /// Set when this page ends traversal.
    pub stop: Option<StopReason>,
    /// Items the remote returned, before screening and truncation.
    pub raw_count: usize,
    /// Items dropped by screening.
    pub skipped: usize,
    /// Whether a request was actually sent for this page.
    pub fetched: bool,
}

impl Page {
    fn terminal(cursor: &PageCursor, reason: StopReason) -> Self {
        Self {
            items: Vec::new(),
            next: None,
            position: cursor.clone(),
            stop: Some(reason),
            raw_count: 0,
            skipped: 0,
            fetched: false,
        }
    }
}

/// Drives one source through its pages.
pub struct Paginator<'a> {
    source: &'a dyn Source,
    transport: &'a RetryingTransport,
    budget: RequestBudget,
}

impl<'a> Paginator<'a> {
    /// Creates a paginator over `source`.
    #[must_use]
    pub fn new(
        source: &'a dyn Source,
        transport: &'a RetryingTransport,
        budget: RequestBudget,
    ) -> Self {
        Self {
            source,
            transport,
            budget,
        }
    }

    /// Fetches the page at `cursor`.
    ///
    /// `produced` is how many records the run already holds (emitted plus
    /// buffered); the page is truncated so that `produced + items` never
    /// exceeds the effective cap.
    ///
    /// # Errors
    ///
    /// Propagates [`TransportError`] from the request.
    #[instrument(skip(self, cursor, filters), fields(mode = %self.source.mode(), cursor = %cursor))]
    pub async fn next_page(
        &self,
        cursor: &PageCursor,
        produced: u64,
        filters: &Filters,
    ) -> Result<Page, TransportError> {
        let cap = self.budget.effective_cap();
        if produced >= cap {
            return Ok(Page::terminal(cursor, StopReason::CapReached));
        }
        let remaining = cap - produced;

        let depth_left = match (self.source.max_depth(), cursor.offset_value()) {
            (Some(max_depth), Some(offset)) if offset >= max_depth => {
                warn!(offset, max_depth, "provider pagination depth reached");
                return Ok(Page::terminal(cursor, StopReason::DepthLimit));
            }
            (Some(max_depth), Some(offset)) => Some(max_depth - offset),
            _ => None,
        };

        let skip = cursor.skip();
        let page_size = u64::from(self.budget.page_size());
        let mut limit = if self.source.screens(filters) {
            page_size
        } else {
            page_size.min(remaining + skip as u64)
        };
        if let Some(depth_left) = depth_left {
            limit = limit.min(depth_left);
        }
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);

        let raw = self
            .source
            .fetch_page(self.transport, cursor, limit, filters)
            .await?;
        let raw_count = raw.items.len();

        debug!(
            raw_count,
            limit,
            total_hint = raw.total_hint,
            has_next_token = raw.next_token.is_some(),
            "page received"
        );

        if raw_count == 0 {
            let claims_more = match cursor {
                PageCursor::Offset { offset } => raw.total_hint.is_some_and(|total| total > *offset),
                PageCursor::Token { .. } => raw.next_token.is_some(),
            };
            if claims_more {
                warn!(
                    cursor = %cursor,
                    total_hint = raw.total_hint,
                    "empty page although the remote reports more results; treating as end"
                );
                return Ok(Page {
                    fetched: true,
                    ..Page::terminal(cursor, StopReason::InconsistentPage)
                });
            }
            return Ok(Page {
                fetched: true,
                ..Page::terminal(cursor, StopReason::Exhausted)
            });
        }

        let remote_end = match cursor {
            PageCursor::Offset { offset } => {
                (raw_count as u64) < u64::from(limit)
                    || raw
                        .total_hint
                        .is_some_and(|total| offset + raw_count as u64 >= total)
            }
            PageCursor::Token { .. } => {
                raw.next_token.is_none() || (raw_count as u64) < u64::from(limit)
            }
        };

        let mut items = Vec::new();
        let mut skipped = 0usize;
        let mut stop = None;
        let mut last_examined = None;

        for (index, item) in raw.items.into_iter().enumerate().skip(skip) {
            last_examined = Some(index);
            match self.source.screen(&item, filters) {
                ItemVerdict::Keep => {
                    items.push(PagedItem {
                        item,
                        resume_at: cursor.after_item(index),
                    });
                    if produced + items.len() as u64 >= cap {
                        stop = Some(StopReason::CapReached);
                        break;
                    }
                }
                ItemVerdict::Skip => skipped += 1,
                ItemVerdict::Stop => {
                    debug!(index, "screen marked the logical end of results");
                    stop = Some(StopReason::Filtered);
                    break;
                }
            }
        }

        let examined_all = stop.is_none();
        let after_page = match cursor {
            PageCursor::Offset { offset } => PageCursor::offset(offset + raw_count as u64),
            PageCursor::Token { .. } => match (&raw.next_token, remote_end) {
                (Some(token), false) => PageCursor::Token {
                    token: Some(token.clone()),
                    skip: 0,
                },
                _ => cursor.after_item(raw_count - 1),
            },
        };

        let next = if examined_all && !remote_end {
            Some(after_page.clone())
        } else {
            None
        };
        if examined_all && remote_end {
            stop = Some(StopReason::Exhausted);
        }

        let position = if examined_all {
            after_page
        } else {
            last_examined.map_or_else(|| cursor.clone(), |index| cursor.after_item(index))
        };
        debug_assert!(position.same_kind(cursor));

        Ok(Page {
            items,
            next,
            position,
            stop,
            raw_count,
            skipped,
            fetched: true,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::Mode;
    use crate::record::{EntityRecord, NormalizedRecord};
    use crate::source::{MappingError, RawPage};
    use crate::transport::{RateLimiter, RetryPolicy};

    /// In-memory offset source: `total` items numbered from 0.
    struct Numbers {
        total: u64,
        page_size: u32,
        claimed_total: Option<u64>,
        stop_below: Option<u64>,
        requests: Mutex<Vec<(u64, u32)>>,
    }

    impl Numbers {
        fn new(total: u64, page_size: u32) -> Self {
            Self {
                total,
                page_size,
                claimed_total: None,
                stop_below: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Source for Numbers {
        fn mode(&self) -> Mode {
            Mode::TrendingPapers
        }

        fn page_size(&self) -> u32 {
            self.page_size
        }

        fn initial_cursor(&self) -> PageCursor {
            PageCursor::offset(0)
        }

        fn screens(&self, _filters: &Filters) -> bool {
            self.stop_below.is_some()
        }

        async fn fetch_page(
            &self,
            _transport: &RetryingTransport,
            cursor: &PageCursor,
            limit: u32,
            _filters: &Filters,
        ) -> Result<RawPage, TransportError> {
            let offset = cursor.offset_value().unwrap();
            self.requests.lock().unwrap().push((offset, limit));
            let end = (offset + u64::from(limit)).min(self.total);
            let items = (offset..end).map(|n| RawItem::Json(json!(n))).collect();
            Ok(RawPage {
                items,
                next_token: None,
                total_hint: self.claimed_total.or(Some(self.total)),
            })
        }

        fn screen(&self, item: &RawItem, _filters: &Filters) -> ItemVerdict {
            let RawItem::Json(Value::Number(n)) = item else {
                return ItemVerdict::Keep;
            };
            match self.stop_below {
                // descending-date stand-in: numbers >= threshold are "too old"
                Some(threshold) if n.as_u64().unwrap() >= threshold => ItemVerdict::Stop,
                _ => ItemVerdict::Keep,
            }
        }

        fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
            Ok(NormalizedRecord::Entity(EntityRecord {
                cik: format!("{item:?}"),
                ticker: String::new(),
                name: String::new(),
                url: String::new(),
            }))
        }
    }

    fn transport() -> RetryingTransport {
        RetryingTransport::new(
            "harvester-test",
            Duration::from_secs(5),
            RetryPolicy::default(),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap()
    }

    fn budget(max_results: u32, page_size: u32) -> RequestBudget {
        RequestBudget::new(max_results, page_size, false).unwrap()
    }

    #[tokio::test]
    async fn test_full_page_advances_offset() {
        let source = Numbers::new(100, 20);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(50, 20));

        let page = paginator
            .next_page(&PageCursor::offset(0), 0, &Filters::default())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 20);
        assert_eq!(page.next, Some(PageCursor::offset(20)));
        assert_eq!(page.position, PageCursor::offset(20));
        assert_eq!(page.stop, None);
        assert_eq!(page.items[4].resume_at, PageCursor::offset(5));
    }

    #[tokio::test]
    async fn test_request_limit_shrinks_to_remaining_cap() {
        let source = Numbers::new(100, 20);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(30, 20));

        let page = paginator
            .next_page(&PageCursor::offset(20), 20, &Filters::default())
            .await
            .unwrap();

        assert_eq!(source.requests.lock().unwrap().as_slice(), &[(20, 10)]);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.stop, Some(StopReason::CapReached));
        assert_eq!(page.next, None);
        assert_eq!(page.position, PageCursor::offset(30));
    }

    #[tokio::test]
    async fn test_short_page_is_exhaustion() {
        let source = Numbers::new(25, 20);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(100, 20));

        let page = paginator
            .next_page(&PageCursor::offset(20), 20, &Filters::default())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 5);
        assert_eq!(page.stop, Some(StopReason::Exhausted));
        assert_eq!(page.next, None);
        assert_eq!(page.position, PageCursor::offset(25));
    }

    #[tokio::test]
    async fn test_total_hint_ends_on_exact_multiple() {
        let source = Numbers::new(40, 20);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(100, 20));

        let page = paginator
            .next_page(&PageCursor::offset(20), 20, &Filters::default())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 20);
        assert_eq!(page.stop, Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn test_empty_page_with_claimed_results_is_inconsistent() {
        let mut source = Numbers::new(20, 20);
        source.claimed_total = Some(500);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(100, 20));

        let page = paginator
            .next_page(&PageCursor::offset(20), 20, &Filters::default())
            .await
            .unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.stop, Some(StopReason::InconsistentPage));
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_screen_stop_discards_rest_of_page() {
        let mut source = Numbers::new(100, 20);
        source.stop_below = Some(7);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(10, 20));

        let page = paginator
            .next_page(&PageCursor::offset(0), 0, &Filters::default())
            .await
            .unwrap();

        // screening sources request full pages regardless of the cap
        assert_eq!(source.requests.lock().unwrap().as_slice(), &[(0, 20)]);
        assert_eq!(page.items.len(), 7);
        assert_eq!(page.stop, Some(StopReason::Filtered));
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_cap_already_reached_sends_no_request() {
        let source = Numbers::new(100, 20);
        let transport = transport();
        let paginator = Paginator::new(&source, &transport, budget(10, 20));

        let page = paginator
            .next_page(&PageCursor::offset(10), 10, &Filters::default())
            .await
            .unwrap();

        assert!(!page.fetched);
        assert_eq!(page.stop, Some(StopReason::CapReached));
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_token_cursor_resume_positions() {
        let cursor = PageCursor::Token {
            token: Some("abc".to_string()),
            skip: 0,
        };
        assert_eq!(
            cursor.after_item(4),
            PageCursor::Token {
                token: Some("abc".to_string()),
                skip: 5
            }
        );
        assert_eq!(cursor.after_item(4).skip(), 5);
        assert_eq!(PageCursor::first_token().token(), None);
    }

    #[test]
    fn test_cursor_serializes_with_kind_tag() {
        let json = serde_json::to_value(PageCursor::offset(30)).unwrap();
        assert_eq!(json, json!({"kind": "offset", "offset": 30}));

        let json = serde_json::to_value(PageCursor::first_token()).unwrap();
        assert_eq!(json, json!({"kind": "token", "token": null, "skip": 0}));
    }
}
