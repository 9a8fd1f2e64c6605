//! Collection of candidate article URLs from the registered news sources.

use crate::status::SharedState;
use crate::traits::{Scraper, Store};
use crate::types::{CollectedUrl, CollectionBatch, NewsSource, PipelineError, Result, ScrapeMode};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Normalize a candidate link into its absolute form: relative links are
/// resolved against the source page, fragments and empty queries are
/// stripped, and only http(s) URLs survive. Parsing lower-cases the host;
/// path and query keep their original casing.
pub fn normalize_url(raw: &str, base: &str) -> Option<Url> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return None;
    }

    let mut url = match Url::parse(candidate) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(base).ok()?.join(candidate).ok()?
        }
        Err(_) => return None,
    };

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }

    Some(url)
}

/// Host component of an absolute URL, or the literal `unknown` when the URL
/// has no discernible scheme/host.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Harvests candidate article URLs from active sources into deduplicated,
/// source-attributed batches, and keeps per-source rolling statistics.
#[derive(Clone)]
pub struct UrlCollector {
    scraper: Arc<dyn Scraper>,
    store: Arc<dyn Store>,
    state: SharedState,
    cancel: Arc<AtomicBool>,
}

impl UrlCollector {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        store: Arc<dyn Store>,
        state: SharedState,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scraper,
            store,
            state,
            cancel,
        }
    }

    /// Collect one batch across `sources`, in the order given. A scraper
    /// failure for one source is logged and does not abort the rest; store
    /// failures do abort, since the store is a run-level collaborator.
    pub async fn collect(&self, sources: &[NewsSource], mode: ScrapeMode) -> Result<CollectionBatch> {
        let mut batch = CollectionBatch::new();
        let mut seen: HashSet<String> = HashSet::new();

        info!("collecting urls from {} source(s)", sources.len());

        for source in sources {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Cancelled);
            }

            match self.scraper.fetch_links(&source.url, mode).await {
                Ok(links) => {
                    let found = links.len();
                    let mut added = 0usize;
                    for link in &links {
                        let Some(url) = normalize_url(link, &source.url) else {
                            continue;
                        };
                        let normalized = url.to_string();
                        if seen.insert(normalized.clone()) {
                            batch.urls.push(CollectedUrl {
                                domain: url.host_str().unwrap_or("unknown").to_string(),
                                url: normalized,
                                source_id: source.id,
                                collected_at: Utc::now(),
                            });
                            added += 1;
                        }
                    }
                    debug!(
                        "source '{}': {} candidate link(s), {} new after dedup",
                        source.name, found, added
                    );
                    self.store
                        .update_source_stats(source.id, found, true)
                        .await?;
                }
                Err(e) => {
                    warn!("collection failed for source '{}': {}", source.name, e);
                    self.state
                        .write()
                        .await
                        .log(format!("collection failed for {}: {}", source.name, e));
                    // The attempt still counts toward the source's stats.
                    self.store.update_source_stats(source.id, 0, false).await?;
                }
            }
        }

        self.store.save_batch(&batch).await?;
        info!(
            "collection batch {} saved with {} url(s)",
            batch.id,
            batch.urls.len()
        );

        Ok(batch)
    }
}
