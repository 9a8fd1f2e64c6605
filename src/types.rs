use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered news source: a page whose links are harvested into batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSource {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: String,
    pub description: String,
    pub active: bool,
    pub added_at: DateTime<Utc>,
    pub last_collected: Option<DateTime<Utc>>,
    pub collection_count: u32,
    /// Running mean of candidate links found per collection attempt.
    pub avg_articles_found: f64,
}

/// One article URL harvested from a source during collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedUrl {
    pub url: String,
    pub source_id: i64,
    /// Host component of the URL, or the literal `unknown`.
    pub domain: String,
    pub collected_at: DateTime<Utc>,
}

/// An immutable snapshot of URLs collected across all active sources.
/// URLs are unique within a batch; batches are independent of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub urls: Vec<CollectedUrl>,
}

impl CollectionBatch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            urls: Vec::new(),
        }
    }
}

impl Default for CollectionBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Unknown,
}

impl Sentiment {
    /// Case-insensitive normalization into the fixed enumeration.
    /// Anything outside it (e.g. "Bullish") maps to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            "neutral" => Sentiment::Neutral,
            _ => Sentiment::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Unknown => "unknown",
        }
    }
}

impl Default for Sentiment {
    fn default() -> Self {
        Sentiment::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeHorizon {
    #[serde(rename = "short-term")]
    ShortTerm,
    #[serde(rename = "medium-term")]
    MediumTerm,
    #[serde(rename = "long-term")]
    LongTerm,
}

impl TimeHorizon {
    /// Accepts `short-term` / `short term` / `short_term` spellings.
    pub fn parse(value: &str) -> Option<Self> {
        let canon = value.trim().to_lowercase().replace([' ', '_'], "-");
        match canon.as_str() {
            "short-term" => Some(TimeHorizon::ShortTerm),
            "medium-term" => Some(TimeHorizon::MediumTerm),
            "long-term" => Some(TimeHorizon::LongTerm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeHorizon::ShortTerm => "short-term",
            TimeHorizon::MediumTerm => "medium-term",
            TimeHorizon::LongTerm => "long-term",
        }
    }
}

/// Structured payload extracted from a model response. List fields keep the
/// model's emission order and are not deduplicated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub summary: String,
    pub investment_implications: String,
    pub key_metrics: Vec<String>,
    pub companies_mentioned: Vec<String>,
    pub sectors_affected: Vec<String>,
    pub sentiment: Sentiment,
    pub risk_factors: Vec<String>,
    pub opportunities: Vec<String>,
    pub time_horizon: Option<TimeHorizon>,
    /// Clamped to [0, 1] when present.
    pub confidence_score: Option<f64>,
}

/// One persisted summarization result. `payload` is `None` when the model
/// response could not be parsed after the bounded repair attempts; the raw
/// response is kept either way for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub source_url: String,
    pub model_used: String,
    pub raw_response: String,
    pub processed_at: DateTime<Utc>,
    pub payload: Option<SummaryPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrapeMode {
    #[default]
    Direct,
    Headless,
}

/// Options accepted by `PipelineController::start`. Opaque to the controller
/// itself; passed through to the collaborators.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub scrape_mode: ScrapeMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            scrape_mode: ScrapeMode::Direct,
        }
    }
}

/// Where a run takes its URL list from.
#[derive(Debug, Clone)]
pub enum UrlSource {
    /// Explicit ordered list; processed as given.
    Explicit(Vec<String>),
    /// The most recently collected batch held by the store.
    LatestBatch,
}

/// Fixed, documented bounds for the engine. These are configuration, not
/// hidden constants.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_timeout_seconds: u64,
    pub summarize_timeout_seconds: u64,
    /// Repair attempts for malformed model output before the item is
    /// recorded as failed.
    pub repair_retries: u32,
    /// Log entries retained; oldest are evicted first.
    pub log_capacity: usize,
    /// Politeness delay between items in a run.
    pub delay_between_items_ms: u64,
    /// Article text is truncated near this length before summarization.
    pub max_article_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: 30,
            summarize_timeout_seconds: 120,
            repair_retries: 3,
            log_capacity: 500,
            delay_between_items_ms: 1000,
            max_article_chars: 8000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("another pipeline run is already active")]
    Busy,

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("source not found: {id}")]
    SourceNotFound { id: i64 },

    #[error("no collected batch available")]
    NoBatch,

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
