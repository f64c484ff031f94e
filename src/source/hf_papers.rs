//! HuggingFace daily (trending) papers.

use async_trait::async_trait;
use serde_json::Value;

use super::{ItemVerdict, MappingError, RawItem, RawPage, Source, str_field, str_list};
use crate::config::{Filters, Mode};
use crate::paginate::PageCursor;
use crate::record::{NormalizedRecord, PaperRecord, PaperSource};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://huggingface.co";
const PAGE_SIZE: u32 = 100;

/// HuggingFace `/api/daily_papers`.
#[derive(Debug, Clone)]
pub struct HfDailyPapersSource {
    endpoint: String,
}

impl HfDailyPapersSource {
    /// Source against huggingface.co.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same API.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            endpoint: format!("{}/api/daily_papers", base_url.trim_end_matches('/')),
        }
    }
}

impl Default for HfDailyPapersSource {
    fn default() -> Self {
        Self::new()
    }
}

fn paper_of(value: &Value) -> &Value {
    value.get("paper").filter(|p| p.is_object()).unwrap_or(value)
}

#[async_trait]
impl Source for HfDailyPapersSource {
    fn mode(&self) -> Mode {
        Mode::TrendingPapers
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn screens(&self, filters: &Filters) -> bool {
        filters.query.is_some()
    }

    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        _filters: &Filters,
    ) -> Result<RawPage, TransportError> {
        let request = ApiRequest::get(&self.endpoint)?
            .query("limit", limit.to_string())
            .query("offset", cursor.offset_value().unwrap_or(0).to_string());

        let response = transport.send(&request).await?;
        let items: Vec<Value> = response.json()?;

        Ok(RawPage {
            items: items.into_iter().map(RawItem::Json).collect(),
            next_token: None,
            total_hint: None,
        })
    }

    /// Optional keyword filter: case-insensitive substring of title or summary.
    fn screen(&self, item: &RawItem, filters: &Filters) -> ItemVerdict {
        let (Some(query), Some(value)) = (filters.query.as_deref(), item.as_json()) else {
            return ItemVerdict::Keep;
        };
        let needle = query.to_lowercase();
        let paper = paper_of(value);
        let matches = ["title", "summary"].iter().any(|key| {
            paper
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|text| text.to_lowercase().contains(&needle))
        });

        if matches {
            ItemVerdict::Keep
        } else {
            ItemVerdict::Skip
        }
    }

    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
        let value = item
            .as_json()
            .ok_or(MappingError::UnexpectedShape("daily paper JSON object"))?;
        let paper = paper_of(value);

        let title = str_field(paper, "title").ok_or(MappingError::MissingField("title"))?;
        let arxiv_id = str_field(paper, "id");
        let author_list: Vec<String> = paper
            .get("authors")
            .and_then(Value::as_array)
            .map(|authors| {
                authors
                    .iter()
                    .filter_map(|author| str_field(author, "name"))
                    .collect()
            })
            .unwrap_or_default();

        let submitted_by = value
            .get("submittedBy")
            .and_then(|user| str_field(user, "fullname").or_else(|| str_field(user, "user")));
        let upvotes = paper
            .get("upvotes")
            .or_else(|| value.get("upvotes"))
            .and_then(Value::as_u64);

        Ok(NormalizedRecord::Paper(PaperRecord {
            source: Some(PaperSource::HuggingfaceDaily),
            title,
            summary: str_field(paper, "summary").unwrap_or_default(),
            authors: author_list.join(", "),
            author_list,
            published_date: str_field(paper, "publishedAt"),
            upvotes,
            num_comments: value.get("numComments").and_then(Value::as_u64),
            ai_summary: str_field(paper, "ai_summary"),
            ai_keywords: str_list(paper, "ai_keywords"),
            submitted_by,
            media_url: str_field(value, "mediaUrl"),
            pdf_url: arxiv_id
                .as_ref()
                .map(|id| format!("https://arxiv.org/pdf/{id}")),
            url: arxiv_id
                .as_ref()
                .map(|id| format!("https://huggingface.co/papers/{id}"))
                .unwrap_or_default(),
            arxiv_id,
            ..PaperRecord::default()
        }))
    }
}
