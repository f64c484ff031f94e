//! Run configuration: the JSON input document, validation and run identity.
//!
//! A [`RunInput`] is what the user supplies (input file merged with CLI flags).
//! [`RunInput::validate`] turns it into an immutable [`RunConfig`] or a
//! [`ConfigError`] naming the offending field.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default number of records requested.
pub const DEFAULT_MAX_RESULTS: u32 = 100;

/// Absolute ceiling on records per run.
pub const HARD_CAP: u32 = 1000;

/// Ceiling for unauthenticated (free-tier) runs.
pub const FREE_TIER_CAP: u32 = 25;

/// Records per sink flush.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[allow(clippy::expect_used)]
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("date regex is valid")
});

#[allow(clippy::expect_used)]
static CIK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:CIK)?0*(\d{1,10})$").expect("CIK regex is valid")
});

/// Invalid run input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("invalid `{field}`: {reason}\n  Suggestion: {suggestion}")]
    Invalid {
        /// Input field name (camelCase, as in the input document).
        field: &'static str,
        /// What is wrong with it.
        reason: String,
        /// How to fix it.
        suggestion: String,
    },

    /// The input document could not be read or parsed.
    #[error("cannot read input document: {0}")]
    Document(String),
}

impl ConfigError {
    fn invalid(
        field: &'static str,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Returns the offending field, if any.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Document(_) => None,
        }
    }
}

/// What a run harvests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// HuggingFace Hub model search.
    SearchModels,
    /// arXiv paper search.
    SearchPapers,
    /// HuggingFace daily papers feed.
    TrendingPapers,
    /// EDGAR entity resolution from the ticker directory.
    CompanySearch,
    /// EDGAR full-text filing search.
    FilingSearch,
    /// EDGAR XBRL company facts.
    CompanyFacts,
}

impl Mode {
    /// All modes, in CLI help order.
    pub const ALL: [Self; 6] = [
        Self::SearchModels,
        Self::SearchPapers,
        Self::TrendingPapers,
        Self::CompanySearch,
        Self::FilingSearch,
        Self::CompanyFacts,
    ];

    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchModels => "search_models",
            Self::SearchPapers => "search_papers",
            Self::TrendingPapers => "trending_papers",
            Self::CompanySearch => "company_search",
            Self::FilingSearch => "filing_search",
            Self::CompanyFacts => "company_facts",
        }
    }

    /// Whether the mode talks to SEC EDGAR.
    #[must_use]
    pub fn is_edgar(&self) -> bool {
        matches!(
            self,
            Self::CompanySearch | Self::FilingSearch | Self::CompanyFacts
        )
    }

    /// Default pacing for the provider: 0.3 s for EDGAR, 0.5 s otherwise.
    #[must_use]
    pub fn default_request_interval_secs(&self) -> f64 {
        if self.is_edgar() { 0.3 } else { 0.5 }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(Mode::as_str).collect();
                format!("invalid mode: {s} (expected one of: {})", known.join(", "))
            })
    }
}

/// Source-specific filters, passed through to sources and persisted with the
/// checkpoint so a resumed run is checked against the same filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cik: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
}

impl Filters {
    /// Blank strings become `None`, surrounding whitespace is trimmed.
    fn normalized(mut self) -> Self {
        for field in [
            &mut self.query,
            &mut self.sort,
            &mut self.pipeline_tag,
            &mut self.library_filter,
            &mut self.arxiv_category,
            &mut self.author,
            &mut self.date_from,
            &mut self.date_to,
            &mut self.cik,
            &mut self.namespace,
            &mut self.concept,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self.forms = self
            .forms
            .iter()
            .map(|f| f.trim().to_uppercase())
            .filter(|f| !f.is_empty())
            .collect();
        self
    }

    /// Overlays `other` on `self`: every value present in `other` wins.
    fn overlay(self, other: Self) -> Self {
        Self {
            query: other.query.or(self.query),
            sort: other.sort.or(self.sort),
            pipeline_tag: other.pipeline_tag.or(self.pipeline_tag),
            library_filter: other.library_filter.or(self.library_filter),
            arxiv_category: other.arxiv_category.or(self.arxiv_category),
            author: other.author.or(self.author),
            date_from: other.date_from.or(self.date_from),
            date_to: other.date_to.or(self.date_to),
            forms: if other.forms.is_empty() {
                self.forms
            } else {
                other.forms
            },
            cik: other.cik.or(self.cik),
            namespace: other.namespace.or(self.namespace),
            concept: other.concept.or(self.concept),
        }
    }
}

/// The input document (`--input <file>`), camelCase like the hosted actor input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunInput {
    pub mode: Option<Mode>,
    #[serde(flatten)]
    pub filters: Filters,
    pub max_results: Option<u32>,
    pub free_tier: Option<bool>,
    pub contact: Option<String>,
    pub request_interval_secs: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

impl RunInput {
    /// Parses an input document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Document`] on malformed JSON or unknown mode values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Document(e.to_string()))
    }

    /// Overlays `overrides` (typically CLI flags) on this document.
    #[must_use]
    pub fn overlay(self, overrides: Self) -> Self {
        Self {
            mode: overrides.mode.or(self.mode),
            filters: self.filters.overlay(overrides.filters),
            max_results: overrides.max_results.or(self.max_results),
            free_tier: overrides.free_tier.or(self.free_tier),
            contact: overrides.contact.or(self.contact),
            request_interval_secs: overrides.request_interval_secs.or(self.request_interval_secs),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            max_retries: overrides.max_retries.or(self.max_retries),
        }
    }

    /// Validates the input and applies defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending field.
    pub fn validate(self) -> Result<RunConfig, ConfigError> {
        let mode = self.mode.unwrap_or(Mode::SearchModels);
        let mut filters = self.filters.normalized();

        for (field, value) in [
            ("dateFrom", filters.date_from.as_deref()),
            ("dateTo", filters.date_to.as_deref()),
        ] {
            if let Some(value) = value {
                validate_date(field, value)?;
            }
        }
        if let (Some(from), Some(to)) = (&filters.date_from, &filters.date_to)
            && from > to
        {
            return Err(ConfigError::invalid(
                "dateFrom",
                format!("{from} is after dateTo {to}"),
                "Swap the dates or widen the range.",
            ));
        }

        let max_results = self.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if max_results == 0 {
            return Err(ConfigError::invalid(
                "maxResults",
                "must be at least 1",
                format!("Use a value between 1 and {HARD_CAP}."),
            ));
        }

        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !(1..=300).contains(&timeout_secs) {
            return Err(ConfigError::invalid(
                "timeoutSecs",
                format!("{timeout_secs} is out of range"),
                "Expected range: 1..=300",
            ));
        }

        let max_retries = self
            .max_retries
            .unwrap_or(crate::transport::DEFAULT_MAX_RETRIES);
        if !(1..=10).contains(&max_retries) {
            return Err(ConfigError::invalid(
                "maxRetries",
                format!("{max_retries} is out of range"),
                "Expected range: 1..=10",
            ));
        }

        let interval = self
            .request_interval_secs
            .unwrap_or_else(|| mode.default_request_interval_secs());
        if !interval.is_finite() || !(0.0..=60.0).contains(&interval) {
            return Err(ConfigError::invalid(
                "requestIntervalSecs",
                format!("{interval} is out of range"),
                "Expected range: 0..=60",
            ));
        }

        validate_sort(mode, filters.sort.as_deref())?;
        validate_mode_fields(mode, &mut filters)?;

        let contact = self
            .contact
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if mode.is_edgar() && contact.is_none() {
            return Err(ConfigError::invalid(
                "contact",
                format!("{mode} sends requests to SEC EDGAR, which rejects anonymous clients"),
                "Pass --contact \"Your Name you@example.org\".",
            ));
        }

        let free_tier = self.free_tier.unwrap_or(false);
        let run_id = run_identity(mode, &filters, max_results, free_tier);

        Ok(RunConfig {
            mode,
            filters,
            max_results,
            free_tier,
            contact,
            request_interval: Duration::from_secs_f64(interval),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            batch_size: DEFAULT_BATCH_SIZE,
            run_id,
        })
    }
}

/// A validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub filters: Filters,
    pub max_results: u32,
    pub free_tier: bool,
    pub contact: Option<String>,
    pub request_interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
    pub batch_size: usize,
    /// Checkpoint scope; derived from the run-relevant input unless overridden.
    pub run_id: String,
}

impl RunConfig {
    /// Replaces the derived run identity with an explicit one.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

/// Result-count limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBudget {
    max_results: u32,
    page_size: u32,
    hard_cap: u32,
    free_tier: bool,
}

impl RequestBudget {
    /// Builds a budget. Requests above the hard cap are clamped to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_results` or `page_size` is zero.
    pub fn new(max_results: u32, page_size: u32, free_tier: bool) -> Result<Self, ConfigError> {
        if max_results == 0 {
            return Err(ConfigError::invalid(
                "maxResults",
                "must be at least 1",
                format!("Use a value between 1 and {HARD_CAP}."),
            ));
        }
        if page_size == 0 {
            return Err(ConfigError::invalid(
                "pageSize",
                "must be at least 1",
                "Source page sizes are fixed; this indicates a misconfigured source.",
            ));
        }
        Ok(Self {
            max_results,
            page_size,
            hard_cap: HARD_CAP,
            free_tier,
        })
    }

    /// `min(maxResults, hardCap, freeTierCap if free tier)`.
    #[must_use]
    pub fn effective_cap(&self) -> u64 {
        let mut cap = self.max_results.min(self.hard_cap);
        if self.free_tier {
            cap = cap.min(FREE_TIER_CAP);
        }
        u64::from(cap)
    }

    /// True when the free-tier ceiling is what limits this run.
    #[must_use]
    pub fn free_tier_binding(&self) -> bool {
        self.free_tier && self.max_results.min(self.hard_cap) > FREE_TIER_CAP
    }

    /// Remote page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The user's requested maximum (before capping).
    #[must_use]
    pub fn max_results(&self) -> u32 {
        self.max_results
    }
}

fn validate_date(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let bad = || {
        ConfigError::invalid(
            field,
            format!("{value:?} is not a calendar date"),
            "Date must be in YYYY-MM-DD format, e.g. 2024-01-31.",
        )
    };
    let caps = DATE_PATTERN.captures(value).ok_or_else(bad)?;
    let month: u32 = caps[2].parse().map_err(|_| bad())?;
    let day: u32 = caps[3].parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(bad());
    }
    Ok(())
}

fn validate_sort(mode: Mode, sort: Option<&str>) -> Result<(), ConfigError> {
    let Some(sort) = sort else {
        return Ok(());
    };
    let allowed: &[&str] = match mode {
        Mode::SearchModels => &["downloads", "likes", "trending"],
        Mode::SearchPapers => &["relevance", "submittedDate", "lastUpdatedDate"],
        _ => &[],
    };
    if allowed.contains(&sort) {
        return Ok(());
    }
    let suggestion = if allowed.is_empty() {
        format!("{mode} has a fixed order; remove `sort`.")
    } else {
        format!("Use one of: {}", allowed.join(", "))
    };
    Err(ConfigError::invalid(
        "sort",
        format!("{sort:?} is not supported for {mode}"),
        suggestion,
    ))
}

fn validate_mode_fields(mode: Mode, filters: &mut Filters) -> Result<(), ConfigError> {
    match mode {
        Mode::SearchModels if filters.query.is_none() => Err(ConfigError::invalid(
            "query",
            "a search query is required for search_models",
            "Pass --query, e.g. --query llama.",
        )),
        Mode::SearchPapers
            if filters.query.is_none()
                && filters.arxiv_category.is_none()
                && filters.author.is_none() =>
        {
            Err(ConfigError::invalid(
                "query",
                "search_papers needs at least one of query, arxivCategory or author",
                "Pass --query, --category or --author.",
            ))
        }
        Mode::CompanySearch | Mode::FilingSearch if filters.query.is_none() => {
            Err(ConfigError::invalid(
                "query",
                format!("a search query is required for {mode}"),
                "Pass --query with a ticker, company name or search phrase.",
            ))
        }
        Mode::CompanyFacts => {
            let Some(raw) = filters.cik.as_deref() else {
                return Err(ConfigError::invalid(
                    "cik",
                    "a CIK is required for company_facts",
                    "Look it up with --mode company_search, then pass --cik 320193.",
                ));
            };
            filters.cik = Some(normalize_cik(raw).ok_or_else(|| {
                ConfigError::invalid(
                    "cik",
                    format!("{raw:?} is not a CIK"),
                    "A CIK is up to 10 digits, e.g. 320193 or 0000320193.",
                )
            })?);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Zero-pads a CIK to the 10 digits EDGAR uses in paths.
#[must_use]
pub fn normalize_cik(raw: &str) -> Option<String> {
    let caps = CIK_PATTERN.captures(raw.trim())?;
    let number: u64 = caps[1].parse().ok()?;
    Some(format!("{number:010}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunIdentity<'a> {
    mode: Mode,
    filters: &'a Filters,
    max_results: u32,
    free_tier: bool,
}

/// Hex SHA-256 of the canonical JSON of the run-relevant input.
fn run_identity(mode: Mode, filters: &Filters, max_results: u32, free_tier: bool) -> String {
    let identity = RunIdentity {
        mode,
        filters,
        max_results,
        free_tier,
    };
    // Struct field order is fixed, so the encoding is canonical.
    let canonical = serde_json::to_vec(&identity).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn input(json: &str) -> RunInput {
        RunInput::from_json(json).unwrap()
    }

    #[test]
    fn test_mode_round_trips_through_strings() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        let err = "crawl".parse::<Mode>().unwrap_err();
        assert!(err.contains("search_models"), "{err}");
    }

    #[test]
    fn test_input_document_uses_camel_case_fields() {
        let config = input(
            r#"{"mode":"search_papers","arxivCategory":"cs.CL","dateFrom":"2024-01-01","maxResults":30}"#,
        )
        .validate()
        .unwrap();

        assert_eq!(config.mode, Mode::SearchPapers);
        assert_eq!(config.filters.arxiv_category.as_deref(), Some("cs.CL"));
        assert_eq!(config.filters.date_from.as_deref(), Some("2024-01-01"));
        assert_eq!(config.max_results, 30);
        assert_eq!(config.request_interval, Duration::from_millis(500));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn test_overlay_prefers_overrides() {
        let base = input(r#"{"mode":"search_models","query":"bert","maxResults":10}"#);
        let overrides = RunInput {
            max_results: Some(50),
            ..RunInput::default()
        };
        let config = base.overlay(overrides).validate().unwrap();
        assert_eq!(config.max_results, 50);
        assert_eq!(config.filters.query.as_deref(), Some("bert"));
    }

    #[test]
    fn test_blank_strings_are_treated_as_absent() {
        let err = input(r#"{"mode":"search_models","query":"   "}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("query"));
    }

    #[test]
    fn test_search_papers_needs_one_filter() {
        let err = input(r#"{"mode":"search_papers"}"#).validate().unwrap_err();
        assert!(err.to_string().contains("arxivCategory"), "{err}");

        assert!(input(r#"{"mode":"search_papers","author":"Hinton"}"#)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_trending_papers_needs_nothing() {
        assert!(input(r#"{"mode":"trending_papers"}"#).validate().is_ok());
    }

    #[test]
    fn test_date_validation() {
        let err = input(r#"{"mode":"trending_papers","dateFrom":"2024/01/01"}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("dateFrom"));

        let err = input(r#"{"mode":"trending_papers","dateTo":"2024-13-01"}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("dateTo"));

        let err = input(
            r#"{"mode":"trending_papers","dateFrom":"2024-02-01","dateTo":"2024-01-01"}"#,
        )
        .validate()
        .unwrap_err();
        assert_eq!(err.field(), Some("dateFrom"));
    }

    #[test]
    fn test_numeric_bounds() {
        let err = input(r#"{"mode":"trending_papers","maxResults":0}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("maxResults"));

        let err = input(r#"{"mode":"trending_papers","timeoutSecs":0}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("timeoutSecs"));

        let err = input(r#"{"mode":"trending_papers","maxRetries":11}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("maxRetries"));

        let err = input(r#"{"mode":"trending_papers","requestIntervalSecs":-0.5}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("requestIntervalSecs"));
    }

    #[test]
    fn test_sort_must_match_mode() {
        assert!(input(r#"{"mode":"search_models","query":"x","sort":"likes"}"#)
            .validate()
            .is_ok());
        let err = input(r#"{"mode":"search_papers","query":"x","sort":"likes"}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("sort"));
    }

    #[test]
    fn test_edgar_modes_require_contact() {
        let err = input(r#"{"mode":"company_search","query":"apple"}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("contact"));

        let config = input(r#"{"mode":"company_search","query":"apple","contact":"a@b.org"}"#)
            .validate()
            .unwrap();
        assert_eq!(config.request_interval, Duration::from_millis(300));
    }

    #[test]
    fn test_company_facts_normalizes_cik() {
        let config = input(r#"{"mode":"company_facts","cik":"CIK320193","contact":"a@b.org"}"#)
            .validate()
            .unwrap();
        assert_eq!(config.filters.cik.as_deref(), Some("0000320193"));

        let err = input(r#"{"mode":"company_facts","cik":"apple","contact":"a@b.org"}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("cik"));
    }

    #[test]
    fn test_forms_are_uppercased() {
        let config = input(
            r#"{"mode":"filing_search","query":"climate","forms":["10-k"," 8-k ",""],"contact":"a@b.org"}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(config.filters.forms, vec!["10-K", "8-K"]);
    }

    #[test]
    fn test_run_identity_is_stable_and_input_sensitive() {
        let a = input(r#"{"mode":"search_models","query":"bert"}"#)
            .validate()
            .unwrap();
        let b = input(r#"{"query":"bert","mode":"search_models","timeoutSecs":60}"#)
            .validate()
            .unwrap();
        let c = input(r#"{"mode":"search_models","query":"gpt"}"#)
            .validate()
            .unwrap();

        assert_eq!(a.run_id, b.run_id, "pacing knobs must not change identity");
        assert_ne!(a.run_id, c.run_id);
        assert_eq!(a.run_id.len(), 64);
    }

    #[test]
    fn test_budget_effective_cap() {
        assert_eq!(RequestBudget::new(30, 20, false).unwrap().effective_cap(), 30);
        assert_eq!(RequestBudget::new(5000, 100, false).unwrap().effective_cap(), 1000);

        let free = RequestBudget::new(1000, 100, true).unwrap();
        assert_eq!(free.effective_cap(), 25);
        assert!(free.free_tier_binding());

        let small_free = RequestBudget::new(10, 100, true).unwrap();
        assert_eq!(small_free.effective_cap(), 10);
        assert!(!small_free.free_tier_binding());

        assert!(RequestBudget::new(0, 100, false).is_err());
    }
}
