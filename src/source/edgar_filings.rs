//! EDGAR full-text filing search (`efts.sec.gov/LATEST/search-index`).

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{MappingError, RawItem, RawPage, Source, str_field, str_list};
use crate::config::{Filters, Mode};
use crate::paginate::PageCursor;
use crate::record::{FilingRecord, NormalizedRecord};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://efts.sec.gov";
/// The search index always serves 100 hits per request.
const PAGE_SIZE: u32 = 100;
/// The search index refuses `from` values past this depth.
const MAX_DEPTH: u64 = 10_000;

/// EDGAR full-text search.
#[derive(Debug, Clone)]
pub struct EdgarFilingsSource {
    endpoint: String,
}

impl EdgarFilingsSource {
    /// Source against efts.sec.gov.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same API.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            endpoint: format!("{}/LATEST/search-index", base_url.trim_end_matches('/')),
        }
    }
}

impl Default for EdgarFilingsSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the search request for one page.
pub(crate) fn search_request(
    endpoint: &str,
    filters: &Filters,
    from: u64,
) -> Result<ApiRequest, TransportError> {
    let mut request = ApiRequest::get(endpoint)?
        .query_opt("q", filters.query.as_deref())
        .query_opt(
            "forms",
            (!filters.forms.is_empty()).then(|| filters.forms.join(",")),
        );

    if filters.date_from.is_some() || filters.date_to.is_some() {
        request = request
            .query("dateRange", "custom")
            .query_opt("startdt", filters.date_from.as_deref())
            .query_opt("enddt", filters.date_to.as_deref());
    }

    Ok(request.query("from", from.to_string()))
}

/// Archive URL of the filed document.
fn document_url(cik: &str, accession: &str, file_name: &str) -> Option<String> {
    let cik: u64 = cik.trim().parse().ok()?;
    let folder: String = accession.chars().filter(char::is_ascii_digit).collect();
    Some(format!(
        "https://www.sec.gov/Archives/edgar/data/{cik}/{folder}/{file_name}"
    ))
}

#[async_trait]
impl Source for EdgarFilingsSource {
    fn mode(&self) -> Mode {
        Mode::FilingSearch
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn max_depth(&self) -> Option<u64> {
        Some(MAX_DEPTH)
    }

    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        filters: &Filters,
    ) -> Result<RawPage, TransportError> {
        let from = cursor.offset_value().unwrap_or(0);
        let request = search_request(&self.endpoint, filters, from)?;

        let response = transport.send(&request).await?;
        let body: Value = response.json()?;
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| TransportError::decode(&response.url, "missing hits.hits array"))?;
        let total = body.pointer("/hits/total/value").and_then(Value::as_u64);
        debug!(from, hits = hits.len(), total, "filing search page");

        Ok(RawPage {
            items: hits
                .iter()
                .take(limit as usize)
                .cloned()
                .map(RawItem::Json)
                .collect(),
            next_token: None,
            total_hint: total,
        })
    }

    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
        let hit = item
            .as_json()
            .ok_or(MappingError::UnexpectedShape("search hit"))?;
        let source = hit
            .get("_source")
            .ok_or(MappingError::MissingField("_source"))?;

        let (id_accession, file_name) = match str_field(hit, "_id") {
            Some(id) => match id.split_once(':') {
                Some((accession, file)) => (Some(accession.to_string()), Some(file.to_string())),
                None => (Some(id), None),
            },
            None => (None, None),
        };
        let accession_number = str_field(source, "adsh")
            .or(id_accession)
            .ok_or(MappingError::MissingField("adsh"))?;
        let ciks = str_list(source, "ciks");

        let url = match (ciks.first(), &file_name) {
            (Some(cik), Some(file)) => document_url(cik, &accession_number, file),
            _ => None,
        };

        Ok(NormalizedRecord::Filing(FilingRecord {
            form: str_field(source, "form").or_else(|| str_field(source, "file_type")),
            filed_date: str_field(source, "file_date"),
            period_ending: str_field(source, "period_ending"),
            company_names: str_list(source, "display_names"),
            description: str_field(source, "file_description"),
            accession_number,
            ciks,
            file_name,
            url,
        }))
    }
}
