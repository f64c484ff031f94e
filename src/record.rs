//! Normalized output records.
//!
//! Every provider item is mapped into one [`NormalizedRecord`] variant. On the
//! wire each record is wrapped in a [`RecordEnvelope`] so that every line
//! carries both the `type` discriminator and [`SCHEMA_VERSION`].

use serde::{Deserialize, Serialize};

/// Version of the output record layout. Bump on any breaking field change.
pub const SCHEMA_VERSION: u32 = 1;

/// One normalized record, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedRecord {
    /// A HuggingFace Hub model.
    Model(ModelRecord),
    /// A research paper (arXiv or HuggingFace daily papers).
    Paper(PaperRecord),
    /// An SEC-registered entity.
    Entity(EntityRecord),
    /// An EDGAR filing document hit.
    Filing(FilingRecord),
    /// A single XBRL fact observation.
    Fact(FactRecord),
}

impl NormalizedRecord {
    /// Returns the `type` discriminator value.
    #[must_use]
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Paper(_) => "paper",
            Self::Entity(_) => "entity",
            Self::Filing(_) => "filing",
            Self::Fact(_) => "fact",
        }
    }

    /// Wraps the record with the schema version for output.
    #[must_use]
    pub fn envelope(&self) -> RecordEnvelope<'_> {
        RecordEnvelope {
            schema_version: SCHEMA_VERSION,
            record: self,
        }
    }
}

/// Output shape: `{"schemaVersion": 1, "type": "...", ...fields}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEnvelope<'a> {
    /// Layout version of the record.
    pub schema_version: u32,
    /// The record itself, flattened next to the version.
    #[serde(flatten)]
    pub record: &'a NormalizedRecord,
}

/// HuggingFace model listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub model_id: String,
    pub author: Option<String>,
    pub model_name: String,
    pub pipeline_tag: Option<String>,
    pub library: Option<String>,
    pub downloads: u64,
    pub downloads_all_time: Option<u64>,
    pub likes: u64,
    pub trending: Option<f64>,
    pub tags: Vec<String>,
    pub last_modified: Option<String>,
    pub created_at: Option<String>,
    pub private: bool,
    /// Gating mode (`auto`, `manual`) or `None` for open models.
    pub gated: Option<String>,
    pub url: String,
}

/// Where a paper record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSource {
    Arxiv,
    HuggingfaceDaily,
}

/// Research paper. Daily-paper-only fields are omitted for arXiv records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
    pub source: Option<PaperSource>,
    pub arxiv_id: Option<String>,
    pub title: String,
    pub summary: String,
    /// Authors joined with `, `.
    pub authors: String,
    pub author_list: Vec<String>,
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    /// Categories joined with `, `.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_comments: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub pdf_url: Option<String>,
    pub url: String,
}

/// SEC entity from the ticker directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Zero-padded 10-digit CIK.
    pub cik: String,
    pub ticker: String,
    pub name: String,
    pub url: String,
}

/// EDGAR full-text search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilingRecord {
    pub accession_number: String,
    pub form: Option<String>,
    pub filed_date: Option<String>,
    pub period_ending: Option<String>,
    pub ciks: Vec<String>,
    pub company_names: Vec<String>,
    pub file_name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

/// One XBRL fact value for one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRecord {
    pub cik: String,
    pub entity_name: Option<String>,
    pub taxonomy: String,
    pub concept: String,
    pub label: Option<String>,
    pub unit: String,
    pub value: serde_json::Value,
    pub start: Option<String>,
    pub end: Option<String>,
    pub accession_number: Option<String>,
    pub fiscal_year: Option<i64>,
    pub fiscal_period: Option<String>,
    pub form: Option<String>,
    pub filed: Option<String>,
    pub frame: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entity() -> NormalizedRecord {
        NormalizedRecord::Entity(EntityRecord {
            cik: "0000320193".to_string(),
            ticker: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            url: "https://www.sec.gov/cgi-bin/browse-edgar?action=getcompany&CIK=0000320193"
                .to_string(),
        })
    }

    #[test]
    fn test_envelope_carries_type_and_schema_version() {
        let record = entity();
        let value = serde_json::to_value(record.envelope()).unwrap();

        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["type"], "entity");
        assert_eq!(value["ticker"], "AAPL");
        assert_eq!(record.record_type(), "entity");
    }

    #[test]
    fn test_arxiv_paper_omits_daily_only_fields() {
        let record = NormalizedRecord::Paper(PaperRecord {
            source: Some(PaperSource::Arxiv),
            arxiv_id: Some("2401.12345".to_string()),
            title: "T".to_string(),
            url: "https://arxiv.org/abs/2401.12345".to_string(),
            ..PaperRecord::default()
        });
        let value = serde_json::to_value(record.envelope()).unwrap();

        assert_eq!(value["type"], "paper");
        assert_eq!(value["source"], "arxiv");
        assert_eq!(value["arxivId"], "2401.12345");
        assert!(value.get("upvotes").is_none());
        assert!(value.get("aiKeywords").is_none());
        assert!(value["pdfUrl"].is_null());
    }

    #[test]
    fn test_record_deserializes_from_tagged_json() {
        let json = serde_json::to_string(&entity()).unwrap();
        let back: NormalizedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity());
    }
}
