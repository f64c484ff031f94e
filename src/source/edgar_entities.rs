//! SEC company directory (`company_tickers.json`) with ticker/name lookup.
//!
//! The directory is one document; it is downloaded once per run and paged
//! in memory so checkpoints still carry a plain offset.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{DocumentCache, MappingError, RawItem, RawPage, Source, slice_page, str_field};
use crate::config::{Filters, Mode, normalize_cik};
use crate::paginate::PageCursor;
use crate::record::{EntityRecord, NormalizedRecord};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://www.sec.gov";
const PAGE_SIZE: u32 = 100;

/// EDGAR entity resolution over the ticker directory.
#[derive(Debug)]
pub struct EdgarEntitiesSource {
    endpoint: String,
    directory: DocumentCache<Vec<Value>>,
}

impl EdgarEntitiesSource {
    /// Source against www.sec.gov.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same document.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            endpoint: format!("{}/files/company_tickers.json", base_url.trim_end_matches('/')),
            directory: DocumentCache::default(),
        }
    }

    async fn directory(
        &self,
        transport: &RetryingTransport,
    ) -> Result<Arc<Vec<Value>>, TransportError> {
        self.directory
            .get_or_fetch(&self.endpoint, || async move {
                let response = transport.send(&ApiRequest::get(&self.endpoint)?).await?;
                let document: Value = response.json()?;
                directory_entries(document).ok_or_else(|| {
                    TransportError::decode(&response.url, "expected an object of companies")
                })
            })
            .await
    }
}

impl Default for EdgarEntitiesSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Entries of the directory in document order.
///
/// The document is an object keyed `"0"`, `"1"`, ...; keys are sorted
/// numerically because JSON object order is not preserved.
fn directory_entries(document: Value) -> Option<Vec<Value>> {
    let Value::Object(map) = document else {
        return None;
    };
    let mut entries: Vec<(u64, Value)> = map
        .into_iter()
        .map(|(key, value)| (key.parse().unwrap_or(u64::MAX), value))
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    Some(entries.into_iter().map(|(_, value)| value).collect())
}

/// Directory entries whose ticker or name contains `query` (case-insensitive).
/// Exact ticker matches come first.
pub(crate) fn matching_entries(entries: &[Value], query: &str) -> Vec<Value> {
    let needle = query.trim().to_lowercase();

    let (mut exact, partial): (Vec<Value>, Vec<Value>) = entries
        .iter()
        .filter(|entry| {
            lowercase_field(entry, "ticker").contains(&needle)
                || lowercase_field(entry, "title").contains(&needle)
        })
        .cloned()
        .partition(|entry| lowercase_field(entry, "ticker") == needle);
    exact.extend(partial);
    exact
}

fn lowercase_field(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn cik_of(value: &Value) -> Option<String> {
    match value.get("cik_str")? {
        Value::Number(number) => number.as_u64().map(|n| format!("{n:010}")),
        Value::String(text) => normalize_cik(text),
        _ => None,
    }
}

#[async_trait]
impl Source for EdgarEntitiesSource {
    fn mode(&self) -> Mode {
        Mode::CompanySearch
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        filters: &Filters,
    ) -> Result<RawPage, TransportError> {
        let directory = self.directory(transport).await?;
        let matches = matching_entries(&directory, filters.query.as_deref().unwrap_or_default());
        debug!(directory = directory.len(), matches = matches.len(), "entity lookup");

        Ok(RawPage {
            items: slice_page(&matches, cursor, limit)
                .into_iter()
                .map(RawItem::Json)
                .collect(),
            next_token: None,
            total_hint: Some(matches.len() as u64),
        })
    }

    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
        let value = item
            .as_json()
            .ok_or(MappingError::UnexpectedShape("company directory entry"))?;
        let cik = cik_of(value).ok_or(MappingError::MissingField("cik_str"))?;
        let ticker = str_field(value, "ticker").ok_or(MappingError::MissingField("ticker"))?;
        let name = str_field(value, "title").ok_or(MappingError::MissingField("title"))?;

        Ok(NormalizedRecord::Entity(EntityRecord {
            url: format!("https://www.sec.gov/cgi-bin/browse-edgar?action=getcompany&CIK={cik}"),
            cik,
            ticker,
            name,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::test_support::quick_transport;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn directory_document() -> Value {
        json!({
            "0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."},
            "1": {"cik_str": 789019, "ticker": "MSFT", "title": "MICROSOFT CORP"},
            "2": {"cik_str": 1_652_044, "ticker": "GOOGL", "title": "Alphabet Inc."},
            "10": {"cik_str": 1_418_091, "ticker": "APLE", "title": "Apple Hospitality REIT, Inc."},
            "11": {"cik_str": 2_000_001, "ticker": "APP", "title": "AppLovin Corp"}
        })
    }

    #[test]
    fn test_directory_entries_keep_numeric_order() {
        let entries = directory_entries(directory_document()).unwrap();
        let tickers: Vec<&str> = entries.iter().map(|e| e["ticker"].as_str().unwrap()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT", "GOOGL", "APLE", "APP"]);
        assert!(directory_entries(json!([1, 2])).is_none());
    }

    #[test]
    fn test_matching_entries_puts_exact_ticker_first() {
        let entries = directory_entries(directory_document()).unwrap();

        let matches = matching_entries(&entries, "app");
        let tickers: Vec<&str> = matches.iter().map(|e| e["ticker"].as_str().unwrap()).collect();
        assert_eq!(tickers, vec!["APP", "AAPL", "APLE"]);

        assert!(matching_entries(&entries, "zzzz").is_empty());
    }

    #[test]
    fn test_map_entity_pads_cik() {
        let item = RawItem::Json(json!({"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}));
        let NormalizedRecord::Entity(entity) = EdgarEntitiesSource::new().map(&item).unwrap() else {
            panic!("expected an entity record");
        };
        assert_eq!(entity.cik, "0000320193");
        assert_eq!(entity.ticker, "AAPL");
        assert!(entity.url.ends_with("CIK=0000320193"));
    }

    #[test]
    fn test_map_entity_without_cik_fails() {
        let err = EdgarEntitiesSource::new()
            .map(&RawItem::Json(json!({"ticker": "X", "title": "X"})))
            .unwrap_err();
        assert_eq!(err, MappingError::MissingField("cik_str"));
    }

    #[tokio::test]
    async fn test_fetch_pages_slice_one_download() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(directory_document()))
            .expect(1)
            .mount(&server)
            .await;

        let source = EdgarEntitiesSource::with_base_url(&server.uri());
        let transport = quick_transport();
        let filters = Filters {
            query: Some("apple".into()),
            ..Filters::default()
        };

        let first = source
            .fetch_page(&transport, &PageCursor::offset(0), 1, &filters)
            .await
            .unwrap();
        let second = source
            .fetch_page(&transport, &PageCursor::offset(1), 1, &filters)
            .await
            .unwrap();

        assert_eq!(first.total_hint, Some(2));
        assert_eq!(first.items.len(), 1);
        assert_eq!(second.items.len(), 1);
        assert_ne!(first.items, second.items);
    }
}
