//! HuggingFace Hub model search.
//!
//! The models endpoint pages with an opaque cursor carried in the
//! `Link: <...>; rel="next"` response header.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{MappingError, RawItem, RawPage, Source, str_field, str_list};
use crate::config::{Filters, Mode};
use crate::paginate::PageCursor;
use crate::record::{ModelRecord, NormalizedRecord};
use crate::transport::{ApiRequest, RetryingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://huggingface.co";
const PAGE_SIZE: u32 = 100;

/// Tags that name a library when `library_name` is absent.
const KNOWN_LIBRARIES: &[&str] = &[
    "transformers",
    "diffusers",
    "pytorch",
    "tensorflow",
    "jax",
    "onnx",
    "safetensors",
    "gguf",
    "spacy",
    "keras",
    "sklearn",
    "sentence-transformers",
    "peft",
    "adapter-transformers",
];

#[allow(clippy::expect_used)]
static NEXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("next-link regex is valid")
});

/// HuggingFace `/api/models`.
#[derive(Debug, Clone)]
pub struct HfModelsSource {
    endpoint: String,
    web_base: String,
}

impl HfModelsSource {
    /// Source against huggingface.co.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Source against another host serving the same API.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            endpoint: format!("{base}/api/models"),
            web_base: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Default for HfModelsSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps the `sort` filter to the API sort key.
fn sort_key(sort: Option<&str>) -> &'static str {
    match sort {
        Some("likes") => "likes",
        Some("trending") => "trendingScore",
        _ => "downloads",
    }
}

/// Extracts the `cursor` query parameter of the `rel="next"` link.
pub(crate) fn next_cursor_from_link(link: &str) -> Option<String> {
    let target = NEXT_LINK.captures(link)?.get(1)?.as_str();
    let url = Url::parse(target).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn library_of(value: &Value, tags: &[String]) -> Option<String> {
    str_field(value, "library_name").or_else(|| {
        tags.iter()
            .find(|tag| KNOWN_LIBRARIES.contains(&tag.as_str()))
            .cloned()
    })
}

fn gated_of(value: &Value) -> Option<String> {
    match value.get("gated") {
        Some(Value::String(mode)) if !mode.is_empty() => Some(mode.clone()),
        Some(Value::Bool(true)) => Some("true".to_string()),
        _ => None,
    }
}

#[async_trait]
impl Source for HfModelsSource {
    fn mode(&self) -> Mode {
        Mode::SearchModels
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn initial_cursor(&self) -> PageCursor {
        PageCursor::first_token()
    }

    async fn fetch_page(
        &self,
        transport: &RetryingTransport,
        cursor: &PageCursor,
        limit: u32,
        filters: &Filters,
    ) -> Result<RawPage, TransportError> {
        let request = ApiRequest::get(&self.endpoint)?
            .query_opt("search", filters.query.as_deref())
            .query("sort", sort_key(filters.sort.as_deref()))
            .query("direction", "-1")
            .query("limit", limit.to_string())
            .query_opt("pipeline_tag", filters.pipeline_tag.as_deref())
            .query_opt("library", filters.library_filter.as_deref())
            .query_opt("cursor", cursor.token());

        let response = transport.send(&request).await?;
        let items: Vec<Value> = response.json()?;
        let next_token = response.header("link").and_then(next_cursor_from_link);
        debug!(count = items.len(), has_next = next_token.is_some(), "models page");

        Ok(RawPage {
            items: items.into_iter().map(RawItem::Json).collect(),
            next_token,
            total_hint: None,
        })
    }

    fn map(&self, item: &RawItem) -> Result<NormalizedRecord, MappingError> {
        let value = item
            .as_json()
            .ok_or(MappingError::UnexpectedShape("model JSON object"))?;

        let model_id = str_field(value, "modelId")
            .or_else(|| str_field(value, "id"))
            .ok_or(MappingError::MissingField("modelId"))?;
        let (author, model_name) = match model_id.split_once('/') {
            Some((author, _)) => (
                Some(author.to_string()),
                model_id.rsplit('/').next().unwrap_or(&model_id).to_string(),
            ),
            None => (None, model_id.clone()),
        };
        let tags = str_list(value, "tags");

        Ok(NormalizedRecord::Model(ModelRecord {
            author,
            model_name,
            pipeline_tag: str_field(value, "pipeline_tag"),
            library: library_of(value, &tags),
            downloads: value.get("downloads").and_then(Value::as_u64).unwrap_or(0),
            downloads_all_time: value.get("downloadsAllTime").and_then(Value::as_u64),
            likes: value.get("likes").and_then(Value::as_u64).unwrap_or(0),
            trending: value.get("trendingScore").and_then(Value::as_f64),
            tags,
            last_modified: str_field(value, "lastModified"),
            created_at: str_field(value, "createdAt"),
            private: value.get("private").and_then(Value::as_bool).unwrap_or(false),
            gated: gated_of(value),
            url: format!("{}/{model_id}", self.web_base),
            model_id,
        }))
    }
}
