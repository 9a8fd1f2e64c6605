//! The pipeline state machine: sequences collection, content fetch,
//! summarization and persistence, enforces one run at a time, and reports
//! phase/progress through the shared status handle.

use crate::collector::UrlCollector;
use crate::parser::parse_with_repair;
use crate::status::{shared_state, PipelinePhase, PipelineStatus, SharedState};
use crate::traits::{Scraper, Store, Summarizer};
use crate::types::{
    CollectionBatch, NewsSource, PipelineConfig, PipelineError, Result, RunOptions, ScrapeMode,
    Summary, UrlSource,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a background run ended. Failures per item never surface here; they
/// are converted to log entries at the item boundary.
enum RunOutcome {
    Completed { processed: usize, total: usize },
    Cancelled,
}

#[derive(Clone)]
pub struct PipelineController {
    scraper: Arc<dyn Scraper>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn Store>,
    collector: UrlCollector,
    state: SharedState,
    cancel: Arc<AtomicBool>,
    config: PipelineConfig,
}

impl PipelineController {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Self {
        let state = shared_state(config.log_capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let collector = UrlCollector::new(
            scraper.clone(),
            store.clone(),
            state.clone(),
            cancel.clone(),
        );
        Self {
            scraper,
            summarizer,
            store,
            collector,
            state,
            cancel,
            config,
        }
    }

    /// Begin a run. Fails with `Busy` while another run (or collection) is
    /// active; otherwise transitions to `fetching` and returns immediately,
    /// with all further work on a spawned task.
    pub async fn start(&self, source: UrlSource, options: RunOptions) -> Result<()> {
        {
            let mut st = self.state.write().await;
            if st.running {
                return Err(PipelineError::Busy);
            }
            // Reset under the lock, before `running` becomes observable; a
            // stop() arriving after this point must target the new run.
            self.cancel.store(false, Ordering::SeqCst);
            st.running = true;
            st.phase = PipelinePhase::Fetching;
            st.progress = 0;
            st.log(format!("pipeline run started (model: {})", options.model));
        }

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run(source, options).await;
        });

        Ok(())
    }

    /// Request cooperative cancellation. The flag is observed before each
    /// URL's fetch and before each summarize call; in-flight work finishes.
    pub async fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.state.write().await.log("stop requested");
    }

    /// Immutable snapshot of the current status. Never blocks beyond the
    /// snapshot copy, never mutates.
    pub async fn status(&self) -> PipelineStatus {
        self.state.read().await.snapshot()
    }

    /// Empty the log buffer. Legal in any state.
    pub async fn clear_logs(&self) {
        self.state.write().await.logs.clear();
    }

    /// Collect a fresh batch now. Takes the same single-flight guard as a
    /// run: collection is pipeline work, not a status query.
    pub async fn collect_now(
        &self,
        source_filter: Option<&[i64]>,
        mode: ScrapeMode,
    ) -> Result<CollectionBatch> {
        {
            let mut st = self.state.write().await;
            if st.running {
                return Err(PipelineError::Busy);
            }
            self.cancel.store(false, Ordering::SeqCst);
            st.running = true;
            st.phase = PipelinePhase::Collecting;
            st.progress = 0;
            st.log("url collection started");
        }

        let result = self.run_collection(source_filter, mode).await;

        let mut st = self.state.write().await;
        st.running = false;
        match &result {
            Ok(batch) => {
                st.phase = PipelinePhase::Idle;
                st.log(format!(
                    "collection finished: {} url(s) in batch {}",
                    batch.urls.len(),
                    batch.id
                ));
            }
            Err(PipelineError::Cancelled) => {
                st.phase = PipelinePhase::Idle;
                st.log("collection cancelled by user");
            }
            Err(e) => {
                st.phase = PipelinePhase::Error;
                st.log(format!("collection failed: {e}"));
            }
        }

        result
    }

    async fn run_collection(
        &self,
        source_filter: Option<&[i64]>,
        mode: ScrapeMode,
    ) -> Result<CollectionBatch> {
        let mut sources: Vec<NewsSource> = self.store.get_active_sources().await?;
        if let Some(ids) = source_filter {
            sources.retain(|s| ids.contains(&s.id));
        }
        self.collector.collect(&sources, mode).await
    }

    /// Body of the background run task. Every exit path releases the
    /// single-flight guard.
    async fn run(&self, source: UrlSource, options: RunOptions) {
        let outcome = self.execute_run(source, &options).await;

        let mut st = self.state.write().await;
        st.running = false;
        match outcome {
            Ok(RunOutcome::Completed { processed, total }) => {
                st.phase = PipelinePhase::Completed;
                st.progress = 100;
                st.last_run = Some(Utc::now());
                st.log(format!(
                    "pipeline run completed: {processed}/{total} item(s) summarized"
                ));
                info!("pipeline run completed ({processed}/{total})");
            }
            Ok(RunOutcome::Cancelled) => {
                st.phase = PipelinePhase::Idle;
                st.progress = 0;
                st.log("pipeline run cancelled by user");
                info!("pipeline run cancelled");
            }
            Err(e) => {
                st.phase = PipelinePhase::Error;
                st.last_run = Some(Utc::now());
                st.log(format!("pipeline run failed: {e}"));
                error!("pipeline run failed: {e}");
            }
        }
    }

    async fn execute_run(&self, source: UrlSource, options: &RunOptions) -> Result<RunOutcome> {
        let urls = self.resolve_urls(source).await?;
        let total = urls.len();
        let mut processed = 0usize;

        info!("processing {total} url(s)");

        for (index, url) in urls.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(RunOutcome::Cancelled);
            }
            if index > 0 && self.config.delay_between_items_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_between_items_ms))
                    .await;
            }

            if self.process_url(url, options).await? {
                processed += 1;
            }

            // Progress advances after each item, success or failure.
            let progress = ((index + 1) * 100 / total) as u8;
            let mut st = self.state.write().await;
            st.progress = progress;
        }

        Ok(RunOutcome::Completed { processed, total })
    }

    /// Fetch, summarize and persist one URL. Returns `Ok(true)` when a
    /// parsed summary was persisted. Scrape, summarize and parse failures
    /// are per-item: logged and absorbed here. A store write failure is a
    /// run-level error and propagates.
    async fn process_url(&self, url: &str, options: &RunOptions) -> Result<bool> {
        self.set_phase(PipelinePhase::Fetching).await;
        let fetch = timeout(
            Duration::from_secs(self.config.fetch_timeout_seconds),
            self.scraper.fetch_content(url, options.scrape_mode),
        )
        .await;
        let text = match fetch {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                self.log_item_failure("fetch failed", url, &e.to_string()).await;
                return Ok(false);
            }
            Err(_) => {
                let msg = format!("timed out after {}s", self.config.fetch_timeout_seconds);
                self.log_item_failure("fetch failed", url, &msg).await;
                return Ok(false);
            }
        };

        if self.cancel.load(Ordering::SeqCst) {
            // Stop was requested while the fetch was in flight; the loop
            // head observes the flag next, so skip the summarize call.
            return Ok(false);
        }

        self.set_phase(PipelinePhase::Summarizing).await;
        let summarize = timeout(
            Duration::from_secs(self.config.summarize_timeout_seconds),
            self.summarizer.summarize(&text, &options.model),
        )
        .await;
        let raw = match summarize {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.log_item_failure("summarize failed", url, &e.to_string())
                    .await;
                return Ok(false);
            }
            Err(_) => {
                let msg = format!("timed out after {}s", self.config.summarize_timeout_seconds);
                self.log_item_failure("summarize failed", url, &msg).await;
                return Ok(false);
            }
        };

        let payload = match parse_with_repair(&raw, self.config.repair_retries) {
            Ok(payload) => Some(payload),
            Err(e) => {
                // Recorded as failed, but the raw response is persisted
                // below for audit.
                self.log_item_failure("summarize failed", url, &e.to_string())
                    .await;
                None
            }
        };
        let parsed = payload.is_some();

        self.set_phase(PipelinePhase::Persisting).await;
        let summary = Summary {
            id: Uuid::new_v4(),
            source_url: url.to_string(),
            model_used: options.model.clone(),
            raw_response: raw,
            processed_at: Utc::now(),
            payload,
        };
        self.store.save_summary(&summary).await?;

        debug!("summary persisted for {url}");
        Ok(parsed)
    }

    async fn resolve_urls(&self, source: UrlSource) -> Result<Vec<String>> {
        match source {
            UrlSource::Explicit(urls) => Ok(urls),
            UrlSource::LatestBatch => {
                let batch = self
                    .store
                    .get_latest_batch()
                    .await?
                    .ok_or(PipelineError::NoBatch)?;
                debug!(
                    "resolved latest batch {} with {} url(s)",
                    batch.id,
                    batch.urls.len()
                );
                Ok(batch.urls.into_iter().map(|u| u.url).collect())
            }
        }
    }

    async fn set_phase(&self, phase: PipelinePhase) {
        self.state.write().await.phase = phase;
    }

    async fn log_item_failure(&self, kind: &str, url: &str, detail: &str) {
        warn!("{kind} for {url}: {detail}");
        self.state
            .write()
            .await
            .log(format!("{kind} for {url}: {detail}"));
    }
}
