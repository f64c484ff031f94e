//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvester_core::config::Filters;
use harvester_core::{Mode, RunInput};

/// Harvest research and regulatory listings into a JSON-lines dataset.
///
/// Harvester pages through HuggingFace Hub, arXiv or SEC EDGAR listings,
/// normalizes every item and appends it to a dataset file, checkpointing
/// after each batch so an interrupted run resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// What to harvest (search_models, search_papers, trending_papers,
    /// company_search, filing_search, company_facts)
    #[arg(short, long)]
    pub mode: Option<Mode>,

    /// JSON input document; flags override its fields
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Search text (model search, paper search, entity lookup, full-text search)
    #[arg(long)]
    pub query: Option<String>,

    /// Sort order understood by the selected provider
    #[arg(long)]
    pub sort: Option<String>,

    /// HuggingFace pipeline tag, e.g. text-generation
    #[arg(long)]
    pub pipeline_tag: Option<String>,

    /// HuggingFace library filter, e.g. transformers
    #[arg(long = "library")]
    pub library_filter: Option<String>,

    /// arXiv category, e.g. cs.CL
    #[arg(long = "category")]
    pub arxiv_category: Option<String>,

    /// arXiv author name
    #[arg(long)]
    pub author: Option<String>,

    /// Earliest date (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<String>,

    /// Latest date (YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<String>,

    /// EDGAR form types, comma-separated (10-K,10-Q)
    #[arg(long, value_delimiter = ',')]
    pub forms: Vec<String>,

    /// EDGAR company CIK (company facts)
    #[arg(long)]
    pub cik: Option<String>,

    /// XBRL taxonomy, e.g. us-gaap
    #[arg(long)]
    pub namespace: Option<String>,

    /// XBRL concept, e.g. Revenues
    #[arg(long)]
    pub concept: Option<String>,

    /// Contact sent in the User-Agent ("Name email"); required for EDGAR
    #[arg(long)]
    pub contact: Option<String>,

    /// Maximum records to emit; values above 1000 are clamped to 1000
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_results: Option<u32>,

    /// Cap the run at the free-tier record limit
    #[arg(long)]
    pub free_tier: bool,

    /// Minimum seconds between requests (0 to disable, max 60)
    #[arg(long, value_name = "SECS")]
    pub request_interval: Option<f64>,

    /// Per-attempt timeout in seconds (1-300)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum attempts per request, initial attempt included (1-10)
    #[arg(short = 'r', long)]
    pub max_retries: Option<u32>,

    /// Checkpoint identity; derived from mode and filters when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Discard any stored checkpoint and start over
    #[arg(long)]
    pub fresh: bool,

    /// State database holding checkpoints
    #[arg(long, value_name = "PATH", default_value = "harvester-state.db")]
    pub db: PathBuf,

    /// Dataset file (JSON lines)
    #[arg(short, long, value_name = "PATH", default_value = "dataset.jsonl")]
    pub output: PathBuf,

    /// Provider base URL (mirrors and test servers)
    #[arg(long, hide = true)]
    pub base_url: Option<String>,
}

impl Args {
    /// The flags that override the input document.
    #[must_use]
    pub fn overrides(&self) -> RunInput {
        RunInput {
            mode: self.mode,
            filters: Filters {
                query: self.query.clone(),
                sort: self.sort.clone(),
                pipeline_tag: self.pipeline_tag.clone(),
                library_filter: self.library_filter.clone(),
                arxiv_category: self.arxiv_category.clone(),
                author: self.author.clone(),
                date_from: self.date_from.clone(),
                date_to: self.date_to.clone(),
                forms: self.forms.clone(),
                cik: self.cik.clone(),
                namespace: self.namespace.clone(),
                concept: self.concept.clone(),
            },
            max_results: self.max_results,
            free_tier: self.free_tier.then_some(true),
            contact: self.contact.clone(),
            request_interval_secs: self.request_interval,
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
        }
    }
}
