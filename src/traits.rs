use crate::types::{CollectionBatch, NewsSource, Result, ScrapeMode, Summary};
use async_trait::async_trait;

/// Fetches pages on behalf of the engine. Link-extraction heuristics and
/// browser driving live behind this seam; the engine only sees candidate
/// URLs and article text.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Candidate article URLs found on a source page. May contain relative
    /// links and duplicates; normalization is the collector's job.
    async fn fetch_links(&self, source_url: &str, mode: ScrapeMode) -> Result<Vec<String>>;

    /// Readable text content of one article page.
    async fn fetch_content(&self, url: &str, mode: ScrapeMode) -> Result<String>;
}

/// Language-model collaborator. Returns the raw response text; structural
/// validation happens in the engine.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, model: &str) -> Result<String>;
}

/// Durable storage for sources, batches and summaries. Each write is atomic
/// at the level of one entity; concurrent readers never observe a
/// half-written batch.
#[async_trait]
pub trait Store: Send + Sync {
    /// Active sources in registration order.
    async fn get_active_sources(&self) -> Result<Vec<NewsSource>>;

    /// Record one collection attempt against a source: increment
    /// `collection_count`, fold `articles_found` into the running mean, and
    /// set `last_collected` only when the attempt succeeded.
    async fn update_source_stats(
        &self,
        source_id: i64,
        articles_found: usize,
        success: bool,
    ) -> Result<()>;

    async fn save_batch(&self, batch: &CollectionBatch) -> Result<()>;

    /// The most recently saved batch, if any.
    async fn get_latest_batch(&self) -> Result<Option<CollectionBatch>>;

    async fn save_summary(&self, summary: &Summary) -> Result<()>;
}
