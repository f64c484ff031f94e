//! arXiv search over the Atom query API.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::feed::parse_atom_feed;
use super::{
    FeedEntry, ItemVerdict, MappingError, RawItem, RawPage, Source, collapse_whitespace,
    date_prefix,
};
use crate::config::{Filters, Mode};
use crate::paginate::PageCursor;
use crate::record::{NormalizedRecord, PaperRecord, PaperSource};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org";
const PAGE_SIZE: u32 = 200;
/// arXiv refuses `start` values past this depth.
const MAX_DEPTH: u64 = 10_000;
/// Query used when no query, category or author is given.
const DEFAULT_QUERY: &str = "cat:cs.AI OR cat:cs.LG OR cat:cs.CL OR cat:cs.CV";

#[allow(clippy::expect_used)]
static ARXIV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}\.\d{4,5})").expect("arXiv id regex is valid"));

/// arXiv `/api/query`.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    endpoint: String,
}

impl ArxivSource {
    /// Source against export.arxiv.org.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same API.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            endpoint: format!("{}/api/query", base_url.trim_end_matches('/')),
        }
    }
}

impl Default for ArxivSource {
    fn default() -> Self {
        Self::new()
    }
}

/// `field:value`, quoting values that contain spaces.
fn term(field: &str, value: &str) -> String {
    let value = value.trim();
    if value.contains(' ') {
        format!("{field}:\"{value}\"")
    } else {
        format!("{field}:{value}")
    }
}

/// Builds the `search_query` expression from the filters.
pub(crate) fn build_search_query(filters: &Filters) -> String {
    let mut parts = Vec::new();
    if let Some(query) = &filters.query {
        parts.push(term("all", query));
    }
    if let Some(category) = &filters.arxiv_category {
        parts.push(format!("cat:{}", category.trim()));
    }
    if let Some(author) = &filters.author {
        parts.push(term("au", author));
    }

    if parts.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        parts.join(" AND ")
    }
}

fn sort_by(sort: Option<&str>) -> &'static str {
    match sort {
        Some("submittedDate") => "submittedDate",
        Some("lastUpdatedDate") => "lastUpdatedDate",
        _ => "relevance",
    }
}

fn entry_of(item: &RawItem) -> Result<&FeedEntry, MappingError> {
    match item {
        RawItem::Feed(entry) => Ok(entry),
        RawItem::Json(_) => Err(MappingError::UnexpectedShape("Atom entry")),
    }
}

#[async_trait]
impl Source for ArxivSource {
    fn mode(&self) -> Mode {
        Mode::SearchPapers
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn max_depth(&self) -> Option<u64> {
        Some(MAX_DEPTH)
    }

    fn screens(&self, filters: &Filters) -> bool {
        filters.date_from.is_some() || filters.date_to.is_some()
    }

    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        filters: &Filters,
    ) -> Result<RawPage, TransportError> {
        let search_query = build_search_query(filters);
        let start = cursor.offset_value().unwrap_or(0);
        debug!(search_query = %search_query, start, limit, "arXiv query");

        let request = ApiRequest::get(&self.endpoint)?
            .query("search_query", &search_query)
            .query("start", start.to_string())
            .query("max_results", limit.to_string())
            .query("sortBy", sort_by(filters.sort.as_deref()))
            .query("sortOrder", "descending");

        let response = transport.send(&request).await?;
        let feed = parse_atom_feed(response.text())
            .map_err(|e| TransportError::decode(&response.url, e))?;

        Ok(RawPage {
            items: feed.entries.into_iter().map(RawItem::Feed).collect(),
            next_token: None,
            total_hint: feed.total_results,
        })
    }

    /// Client-side `dateFrom`/`dateTo` filter on the published date.
    ///
    /// With `submittedDate` ordering (newest first) the first entry older than
    /// `dateFrom` ends the traversal; under any other ordering it is skipped.
    fn screen(&self, item: &RawItem, filters: &Filters) -> ItemVerdict {
        let Ok(entry) = entry_of(item) else {
            return ItemVerdict::Keep;
        };
        let Some(published) = entry.published.as_deref() else {
            return ItemVerdict::Keep;
        };
        let date = date_prefix(published.trim());

        if let Some(from) = filters.date_from.as_deref()
            && date < from
        {
            return if filters.sort.as_deref() == Some("submittedDate") {
                ItemVerdict::Stop
            } else {
                ItemVerdict::Skip
            };
        }
        if let Some(to) = filters.date_to.as_deref()
            && date > to
        {
            return ItemVerdict::Skip;
        }
        ItemVerdict::Keep
    }

    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
        let entry = entry_of(item)?;
        if entry.id.is_empty() {
            return Err(MappingError::MissingField("id"));
        }

        let arxiv_id = ARXIV_ID
            .captures(&entry.id)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let mut pdf_url = None;
        let mut abs_url = None;
        for link in &entry.links {
            if link.title.as_deref() == Some("pdf") || link.href.ends_with(".pdf") {
                pdf_url = Some(link.href.clone());
            } else if link.link_type.as_deref() == Some("text/html") || link.href.contains("/abs/")
            {
                abs_url = Some(link.href.clone());
            }
        }
        let url = abs_url.unwrap_or_else(|| match &arxiv_id {
            Some(id) => format!("https://arxiv.org/abs/{id}"),
            None => entry.id.clone(),
        });

        let categories = (!entry.categories.is_empty()).then(|| entry.categories.join(", "));
        let comment = entry
            .comment
            .as_deref()
            .map(collapse_whitespace)
            .filter(|c| !c.is_empty());

        Ok(NormalizedRecord::Paper(PaperRecord {
            source: Some(PaperSource::Arxiv),
            arxiv_id,
            title: collapse_whitespace(&entry.title),
            summary: collapse_whitespace(&entry.summary),
            authors: entry.authors.join(", "),
            author_list: entry.authors.clone(),
            published_date: entry.published.as_deref().map(|d| d.trim().to_string()),
            updated_date: entry.updated.as_deref().map(|d| d.trim().to_string()),
            primary_category: entry.primary_category.clone(),
            categories,
            category_list: entry.categories.clone(),
            comment,
            pdf_url,
            url,
            ..PaperRecord::default()
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::source::FeedLink;
    use crate::test_support::quick_transport;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn entry(id: &str, published: &str) -> RawItem {
        RawItem::Feed(FeedEntry {
            id: id.to_string(),
            title: "A  Title\n  Spanning Lines".to_string(),
            summary: " Body ".to_string(),
            published: Some(published.to_string()),
            ..FeedEntry::default()
        })
    }

    fn date_filters(from: Option<&str>, to: Option<&str>, sort: Option<&str>) -> Filters {
        Filters {
            date_from: from.map(str::to_string),
            date_to: to.map(str::to_string),
            sort: sort.map(str::to_string),
            ..Filters::default()
        }
    }

    #[test]
    fn test_build_search_query() {
        assert_eq!(build_search_query(&Filters::default()), DEFAULT_QUERY);

        let filters = Filters {
            query: Some("large language models".into()),
            arxiv_category: Some("cs.CL".into()),
            author: Some("Hinton".into()),
            ..Filters::default()
        };
        assert_eq!(
            build_search_query(&filters),
            "all:\"large language models\" AND cat:cs.CL AND au:Hinton"
        );

        let filters = Filters {
            author: Some("Yann LeCun".into()),
            ..Filters::default()
        };
        assert_eq!(build_search_query(&filters), "au:\"Yann LeCun\"");
    }

    #[test]
    fn test_screen_date_window() {
        let source = ArxivSource::new();
        let filters = date_filters(Some("2024-01-01"), Some("2024-01-31"), None);

        assert_eq!(
            source.screen(&entry("x", "2024-01-15T00:00:00Z"), &filters),
            ItemVerdict::Keep
        );
        assert_eq!(
            source.screen(&entry("x", "2024-02-01T00:00:00Z"), &filters),
            ItemVerdict::Skip
        );
        assert_eq!(
            source.screen(&entry("x", "2023-12-31T23:59:59Z"), &filters),
            ItemVerdict::Skip
        );
        assert!(source.screens(&filters));
        assert!(!source.screens(&Filters::default()));
    }

    #[test]
    fn test_screen_stops_on_old_entry_when_sorted_by_submission() {
        let source = ArxivSource::new();
        let filters = date_filters(Some("2024-01-01"), None, Some("submittedDate"));

        assert_eq!(
            source.screen(&entry("x", "2023-12-31T23:59:59Z"), &filters),
            ItemVerdict::Stop
        );
        assert_eq!(
            source.screen(&entry("x", "2024-01-01T00:00:00Z"), &filters),
            ItemVerdict::Keep
        );
    }

    #[test]
    fn test_map_entry() {
        let RawItem::Feed(mut feed_entry) = entry("http://arxiv.org/abs/2401.01234v2", "2024-01-03T18:59:59Z")
        else {
            unreachable!()
        };
        feed_entry.authors = vec!["Ada Lovelace".into(), "Alan Turing".into()];
        feed_entry.categories = vec!["cs.CL".into(), "cs.LG".into()];
        feed_entry.links = vec![
            FeedLink {
                href: "http://arxiv.org/abs/2401.01234v2".into(),
                rel: Some("alternate".into()),
                link_type: Some("text/html".into()),
                ..FeedLink::default()
            },
            FeedLink {
                href: "http://arxiv.org/pdf/2401.01234v2".into(),
                title: Some("pdf".into()),
                ..FeedLink::default()
            },
        ];

        let NormalizedRecord::Paper(paper) = ArxivSource::new().map(&RawItem::Feed(feed_entry)).unwrap()
        else {
            panic!("expected a paper record");
        };
        assert_eq!(paper.source, Some(PaperSource::Arxiv));
        assert_eq!(paper.arxiv_id.as_deref(), Some("2401.01234"));
        assert_eq!(paper.title, "A Title Spanning Lines");
        assert_eq!(paper.summary, "Body");
        assert_eq!(paper.authors, "Ada Lovelace, Alan Turing");
        assert_eq!(paper.categories.as_deref(), Some("cs.CL, cs.LG"));
        assert_eq!(paper.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2401.01234v2"));
        assert_eq!(paper.url, "http://arxiv.org/abs/2401.01234v2");
    }

    #[test]
    fn test_map_without_links_builds_abs_url() {
        let NormalizedRecord::Paper(paper) = ArxivSource::new()
            .map(&entry("http://arxiv.org/abs/2312.99999v1", "2023-12-31T00:00:00Z"))
            .unwrap()
        else {
            panic!("expected a paper record");
        };
        assert_eq!(paper.url, "https://arxiv.org/abs/2312.99999");
        assert_eq!(paper.pdf_url, None);
    }

    #[test]
    fn test_map_rejects_json_item() {
        let err = ArxivSource::new()
            .map(&RawItem::Json(serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err, MappingError::UnexpectedShape("Atom entry"));
    }

    #[tokio::test]
    async fn test_fetch_page_parses_feed_and_total() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>3</opensearch:totalResults>
  <entry><id>http://arxiv.org/abs/2401.00001v1</id><title>One</title><summary>S</summary></entry>
  <entry><id>http://arxiv.org/abs/2401.00002v1</id><title>Two</title><summary>S</summary></entry>
</feed>"#;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "all:transformers"))
            .and(query_param("start", "200"))
            .and(query_param("max_results", "50"))
            .and(query_param("sortBy", "relevance"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let source = ArxivSource::with_base_url(&server.uri());
        let filters = Filters {
            query: Some("transformers".into()),
            ..Filters::default()
        };
        let page = source
            .fetch_page(&quick_transport(), &PageCursor::offset(200), 50, &filters)
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_hint, Some(3));
    }

    #[tokio::test]
    async fn test_fetch_page_malformed_feed_is_decode_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<feed><entry></feed>"))
            .mount(&server)
            .await;

        let err = ArxivSource::with_base_url(&server.uri())
            .fetch_page(&quick_transport(), &PageCursor::offset(0), 10, &Filters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }), "{err:?}");
    }
}
