//! EDGAR XBRL company facts, flattened to one record per reported value.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{DocumentCache, MappingError, RawItem, RawPage, Source, slice_page, str_field};
use crate::config::{Filters, Mode, normalize_cik};
use crate::paginate::PageCursor;
use crate::record::{FactRecord, NormalizedRecord};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://data.sec.gov";
const PAGE_SIZE: u32 = 100;

/// `companyfacts/CIK##########.json`.
#[derive(Debug)]
pub struct EdgarFactsSource {
    base_url: String,
    facts: DocumentCache<Vec<Value>>,
}

impl EdgarFactsSource {
    /// Source against data.sec.gov.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same API.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            facts: DocumentCache::default(),
        }
    }

    fn endpoint(&self, cik: &str) -> String {
        format!("{}/api/xbrl/companyfacts/CIK{cik}.json", self.base_url)
    }

    async fn facts(
        &self,
        transport: &RetryingTransport,
        cik: &str,
    ) -> Result<Arc<Vec<Value>>, TransportError> {
        let url = self.endpoint(cik);
        let target = url.as_str();
        self.facts
            .get_or_fetch(target, || async move {
                let response = transport.send(&ApiRequest::get(target)?).await?;
                let document: Value = response.json()?;
                if !document.get("facts").is_some_and(Value::is_object) {
                    return Err(TransportError::decode(&response.url, "missing facts object"));
                }
                Ok(flatten_facts(&document))
            })
            .await
    }
}

impl Default for EdgarFactsSource {
    fn default() -> Self {
        Self::new()
    }
}

/// One flat object per `facts.{taxonomy}.{concept}.units.{unit}[]` entry.
///
/// Order is taxonomy, concept, unit (each sorted by name) then the
/// document's own order, so offsets are stable across downloads.
pub(crate) fn flatten_facts(document: &Value) -> Vec<Value> {
    let cik = document.get("cik").cloned().unwrap_or(Value::Null);
    let entity_name = document.get("entityName").cloned().unwrap_or(Value::Null);
    let empty = Map::new();

    let mut flat = Vec::new();
    let taxonomies = document
        .get("facts")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    for (taxonomy, concepts) in taxonomies {
        for (concept, detail) in concepts.as_object().unwrap_or(&empty) {
            let label = detail.get("label").cloned().unwrap_or(Value::Null);
            let units = detail
                .get("units")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            for (unit, values) in units {
                for value in values.as_array().map(Vec::as_slice).unwrap_or_default() {
                    let mut fact = json!({
                        "cik": cik,
                        "entityName": entity_name,
                        "taxonomy": taxonomy,
                        "concept": concept,
                        "label": label,
                        "unit": unit,
                    });
                    if let (Some(fact), Some(value)) = (fact.as_object_mut(), value.as_object()) {
                        for (key, field) in value {
                            fact.insert(key.clone(), field.clone());
                        }
                    }
                    flat.push(fact);
                }
            }
        }
    }
    flat
}

/// Facts matching the optional namespace (taxonomy) and concept filters.
fn matching_facts(facts: &[Value], filters: &Filters) -> Vec<Value> {
    facts
        .iter()
        .filter(|fact| {
            field_matches(fact, "taxonomy", filters.namespace.as_deref())
                && field_matches(fact, "concept", filters.concept.as_deref())
        })
        .cloned()
        .collect()
}

fn field_matches(fact: &Value, key: &str, wanted: Option<&str>) -> bool {
    wanted.is_none_or(|wanted| {
        fact.get(key)
            .and_then(Value::as_str)
            .is_some_and(|actual| actual.eq_ignore_ascii_case(wanted.trim()))
    })
}

#[async_trait]
impl Source for EdgarFactsSource {
    fn mode(&self) -> Mode {
        Mode::CompanyFacts
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
        let raw_cik = filters.cik.as_deref().unwrap_or_default();
        let cik = normalize_cik(raw_cik).ok_or_else(|| {
            TransportError::invalid_request(self.endpoint(raw_cik), "CIK must be 1 to 10 digits")
        })?;

        let facts = self.facts(transport, &cik).await?;
        let matches = matching_facts(&facts, filters);
        debug!(cik = %cik, facts = facts.len(), matches = matches.len(), "company facts");

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
        let fact = item
            .as_json()
            .ok_or(MappingError::UnexpectedShape("flattened fact object"))?;

        let cik = match fact.get("cik") {
            Some(Value::Number(number)) => number.as_u64().map(|n| format!("{n:010}")),
            Some(Value::String(text)) => normalize_cik(text),
            _ => None,
        }
        .ok_or(MappingError::MissingField("cik"))?;
        let value = fact
            .get("val")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or(MappingError::MissingField("val"))?;

        Ok(NormalizedRecord::Fact(FactRecord {
            cik,
            entity_name: str_field(fact, "entityName"),
            taxonomy: str_field(fact, "taxonomy").ok_or(MappingError::MissingField("taxonomy"))?,
            concept: str_field(fact, "concept").ok_or(MappingError::MissingField("concept"))?,
            label: str_field(fact, "label"),
            unit: str_field(fact, "unit").ok_or(MappingError::MissingField("unit"))?,
            value,
            start: str_field(fact, "start"),
            end: str_field(fact, "end"),
            accession_number: str_field(fact, "accn"),
            fiscal_year: fact.get("fy").and_then(Value::as_i64),
            fiscal_period: str_field(fact, "fp"),
            form: str_field(fact, "form"),
            filed: str_field(fact, "filed"),
            frame: str_field(fact, "frame"),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::test_support::quick_transport;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn document() -> Value {
        json!({
            "cik": 320193,
            "entityName": "Apple Inc.",
            "facts": {
                "us-gaap": {
                    "Revenues": {
                        "label": "Revenues",
                        "units": {"USD": [
                            {"start": "2023-10-01", "end": "2023-12-30", "val": 119_575_000_000_u64,
                             "accn": "0000320193-24-000006", "fy": 2024, "fp": "Q1", "form": "10-Q",
                             "filed": "2024-02-02", "frame": "CY2023Q4"},
                            {"start": "2024-01-01", "end": "2024-03-30", "val": 90_753_000_000_u64,
                             "accn": "0000320193-24-000069", "fy": 2024, "fp": "Q2", "form": "10-Q",
                             "filed": "2024-05-03"}
                        ]}
                    },
                    "Assets": {
                        "label": "Assets",
                        "units": {"USD": [
                            {"end": "2024-09-28", "val": 364_980_000_000_u64, "fy": 2024, "fp": "FY", "form": "10-K"}
                        ]}
                    }
                },
                "dei": {
                    "EntityCommonStockSharesOutstanding": {
                        "label": "Entity Common Stock, Shares Outstanding",
                        "units": {"shares": [{"end": "2024-10-18", "val": 15_115_823_000_u64}]}
                    }
                }
            }
        })
    }

    #[test]
    fn test_flatten_facts_is_ordered_and_complete() {
        let flat = flatten_facts(&document());
        let keys: Vec<(&str, &str)> = flat
            .iter()
            .map(|f| (f["taxonomy"].as_str().unwrap(), f["concept"].as_str().unwrap()))
            .collect();

        assert_eq!(
            keys,
            vec![
                ("dei", "EntityCommonStockSharesOutstanding"),
                ("us-gaap", "Assets"),
                ("us-gaap", "Revenues"),
                ("us-gaap", "Revenues"),
            ]
        );
        assert_eq!(flat[2]["fp"], "Q1");
        assert_eq!(flat[3]["fp"], "Q2");
        assert_eq!(flat[0]["entityName"], "Apple Inc.");
    }

    #[test]
    fn test_matching_facts_filters_namespace_and_concept() {
        let flat = flatten_facts(&document());

        let filters = Filters {
            namespace: Some("US-GAAP".into()),
            ..Filters::default()
        };
        assert_eq!(matching_facts(&flat, &filters).len(), 3);

        let filters = Filters {
            namespace: Some("us-gaap".into()),
            concept: Some("revenues".into()),
            ..Filters::default()
        };
        assert_eq!(matching_facts(&flat, &filters).len(), 2);
        assert_eq!(matching_facts(&flat, &Filters::default()).len(), 4);
    }

    #[test]
    fn test_map_fact() {
        let flat = flatten_facts(&document());
        let NormalizedRecord::Fact(fact) = EdgarFactsSource::new()
            .map(&RawItem::Json(flat[2].clone()))
            .unwrap()
        else {
            panic!("expected a fact record");
        };

        assert_eq!(fact.cik, "0000320193");
        assert_eq!(fact.taxonomy, "us-gaap");
        assert_eq!(fact.concept, "Revenues");
        assert_eq!(fact.unit, "USD");
        assert_eq!(fact.value, json!(119_575_000_000_u64));
        assert_eq!(fact.fiscal_year, Some(2024));
        assert_eq!(fact.frame.as_deref(), Some("CY2023Q4"));
    }

    #[test]
    fn test_map_fact_without_value_fails() {
        let err = EdgarFactsSource::new()
            .map(&RawItem::Json(json!({"cik": 1, "taxonomy": "dei", "concept": "X", "unit": "USD"})))
            .unwrap_err();
        assert_eq!(err, MappingError::MissingField("val"));
    }

    #[tokio::test]
    async fn test_fetch_page_downloads_padded_cik_once() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/api/xbrl/companyfacts/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document()))
            .expect(1)
            .mount(&server)
            .await;

        let source = EdgarFactsSource::with_base_url(&server.uri());
        let transport = quick_transport();
        let filters = Filters {
            cik: Some("320193".into()),
            namespace: Some("us-gaap".into()),
            ..Filters::default()
        };

        let first = source
            .fetch_page(&transport, &PageCursor::offset(0), 2, &filters)
            .await
            .unwrap();
        let rest = source
            .fetch_page(&transport, &PageCursor::offset(2), 2, &filters)
            .await
            .unwrap();

        assert_eq!(first.total_hint, Some(3));
        assert_eq!(first.items.len(), 2);
        assert_eq!(rest.items.len(), 1);
    }
}
