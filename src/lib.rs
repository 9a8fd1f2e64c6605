//! News summarization pipeline: harvests article URLs from registered
//! sources, fetches article content, summarizes it with a local LLM and
//! persists the structured results.

pub mod collector;
pub mod controller;
pub mod memory_store;
pub mod parser;
pub mod scraper;
pub mod sqlite_store;
pub mod status;
pub mod summarizer;
pub mod traits;
pub mod types;

pub use collector::UrlCollector;
pub use controller::PipelineController;
pub use memory_store::MemoryStore;
pub use scraper::HttpScraper;
pub use sqlite_store::SqliteStore;
pub use status::{LogEntry, PipelinePhase, PipelineStatus};
pub use summarizer::OllamaSummarizer;
pub use traits::{Scraper, Store, Summarizer};
pub use types::{
    CollectedUrl, CollectionBatch, NewsSource, PipelineConfig, PipelineError, Result, RunOptions,
    ScrapeMode, Sentiment, Summary, SummaryPayload, TimeHorizon, UrlSource,
};
