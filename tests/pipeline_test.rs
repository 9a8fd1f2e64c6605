use async_trait::async_trait;
use news_pipeline::{
    MemoryStore, PipelineConfig, PipelineController, PipelineError, PipelinePhase, Result,
    RunOptions, ScrapeMode, Scraper, Summarizer, UrlSource,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct StubScraper {
    links: HashMap<String, Vec<String>>,
    content: HashMap<String, String>,
    failing_sources: HashSet<String>,
    slow_urls: HashSet<String>,
    slow_delay: Duration,
}

impl StubScraper {
    fn with_links(mut self, source_url: &str, links: &[&str]) -> Self {
        self.links
            .insert(source_url.to_string(), links.iter().map(|s| s.to_string()).collect());
        self
    }

    fn with_content(mut self, url: &str, text: &str) -> Self {
        self.content.insert(url.to_string(), text.to_string());
        self
    }

    fn with_slow_content(mut self, url: &str, text: &str, delay: Duration) -> Self {
        self.slow_urls.insert(url.to_string());
        self.slow_delay = delay;
        self.with_content(url, text)
    }

    fn failing_source(mut self, source_url: &str) -> Self {
        self.failing_sources.insert(source_url.to_string());
        self
    }
}

#[async_trait]
impl Scraper for StubScraper {
    async fn fetch_links(&self, source_url: &str, _mode: ScrapeMode) -> Result<Vec<String>> {
        if self.failing_sources.contains(source_url) {
            return Err(PipelineError::General("connection refused".to_string()));
        }
        Ok(self.links.get(source_url).cloned().unwrap_or_default())
    }

    async fn fetch_content(&self, url: &str, _mode: ScrapeMode) -> Result<String> {
        if self.slow_urls.contains(url) {
            tokio::time::sleep(self.slow_delay).await;
        }
        self.content
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::General(format!("no content for {url}")))
    }
}

/// Maps article text to a canned model response. Text starting with `FAIL`
/// produces a summarize error; text starting with `SLOW` sleeps for
/// `slow_delay` first; unmapped text gets a minimal valid response.
struct StubSummarizer {
    responses: HashMap<String, String>,
    delay: Duration,
    slow_delay: Duration,
}

impl StubSummarizer {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            slow_delay: Duration::ZERO,
        }
    }

    fn with_response(mut self, article_text: &str, response: &str) -> Self {
        self.responses
            .insert(article_text.to_string(), response.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_slow_delay(mut self, delay: Duration) -> Self {
        self.slow_delay = delay;
        self
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(&self, text: &str, _model: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if text.starts_with("SLOW") {
            tokio::time::sleep(self.slow_delay).await;
        }
        if text.starts_with("FAIL") {
            return Err(PipelineError::General("model unavailable".to_string()));
        }
        Ok(self
            .responses
            .get(text)
            .cloned()
            .unwrap_or_else(|| r#"{"summary": "ok", "sentiment": "neutral"}"#.to_string()))
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        delay_between_items_ms: 0,
        fetch_timeout_seconds: 5,
        summarize_timeout_seconds: 5,
        ..PipelineConfig::default()
    }
}

fn controller_with(
    scraper: StubScraper,
    summarizer: StubSummarizer,
    store: Arc<MemoryStore>,
) -> PipelineController {
    controller_with_config(scraper, summarizer, store, test_config())
}

fn controller_with_config(
    scraper: StubScraper,
    summarizer: StubSummarizer,
    store: Arc<MemoryStore>,
    config: PipelineConfig,
) -> PipelineController {
    PipelineController::new(Arc::new(scraper), Arc::new(summarizer), store, config)
}

async fn wait_until_idle(controller: &PipelineController) -> news_pipeline::PipelineStatus {
    for _ in 0..200 {
        let status = controller.status().await;
        if !status.running {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pipeline did not settle in time");
}

#[tokio::test]
async fn successful_run_reaches_completed_at_full_progress() {
    let scraper = StubScraper::default()
        .with_content("https://n.example/a", "Article A body.")
        .with_content("https://n.example/b", "Article B body.");
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, StubSummarizer::new(), store.clone());

    controller
        .start(
            UrlSource::Explicit(vec![
                "https://n.example/a".to_string(),
                "https://n.example/b".to_string(),
            ]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(status.progress, 100);
    assert!(status.last_run.is_some());

    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.payload.is_some()));
}

#[tokio::test]
async fn second_start_is_rejected_while_a_run_is_active() {
    let scraper = StubScraper::default().with_content("https://n.example/a", "Article A body.");
    let summarizer = StubSummarizer::new().with_delay(Duration::from_millis(200));
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, summarizer, store);

    controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let err = controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Busy));

    // The guard is released once the first run settles.
    wait_until_idle(&controller).await;
    controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap();
    wait_until_idle(&controller).await;
}

#[tokio::test]
async fn stop_lands_in_idle_with_partial_results() {
    let urls: Vec<String> = (0..4).map(|i| format!("https://n.example/{i}")).collect();
    let mut scraper = StubScraper::default();
    for url in &urls {
        scraper = scraper.with_content(url, "Some article body.");
    }
    let summarizer = StubSummarizer::new().with_delay(Duration::from_millis(100));
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, summarizer, store.clone());

    controller
        .start(UrlSource::Explicit(urls), RunOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.stop().await;

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Idle);
    assert_eq!(status.progress, 0);
    assert!(status
        .logs
        .iter()
        .any(|e| e.message.contains("cancelled")));

    // Whatever finished before the stop stays persisted.
    assert!(store.summaries().await.len() < 4);
}

#[tokio::test]
async fn collection_dedups_across_sources_and_updates_stats() {
    let scraper = StubScraper::default()
        .with_links(
            "https://site-a.example/",
            &["/x", "/y", "https://site-a.example/x#frag"],
        )
        .failing_source("https://site-b.example/");
    let store = Arc::new(MemoryStore::new());
    let a = store.add_source("A", "https://site-a.example/", "General", true).await;
    let b = store.add_source("B", "https://site-b.example/", "General", true).await;
    let controller = controller_with(scraper, StubSummarizer::new(), store.clone());

    let batch = controller.collect_now(None, ScrapeMode::Direct).await.unwrap();

    // /x and /x#frag normalize to the same URL.
    let urls: Vec<&str> = batch.urls.iter().map(|u| u.url.as_str()).collect();
    assert_eq!(urls, vec!["https://site-a.example/x", "https://site-a.example/y"]);
    assert!(batch.urls.iter().all(|u| u.source_id == a));

    let source_a = store.source(a).await.unwrap();
    assert_eq!(source_a.collection_count, 1);
    assert!(source_a.last_collected.is_some());
    assert!((source_a.avg_articles_found - 3.0).abs() < 1e-9);

    let source_b = store.source(b).await.unwrap();
    assert_eq!(source_b.collection_count, 1);
    assert!(source_b.last_collected.is_none());

    let status = controller.status().await;
    assert_eq!(status.phase, PipelinePhase::Idle);
    assert!(status.logs.iter().any(|e| e.message.contains("B")));
}

#[tokio::test]
async fn item_failures_do_not_abort_the_run() {
    let scraper = StubScraper::default()
        .with_content("https://n.example/good", "A fine article.")
        .with_content("https://n.example/bad", "FAIL this one");
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, StubSummarizer::new(), store.clone());

    controller
        .start(
            UrlSource::Explicit(vec![
                "https://n.example/bad".to_string(),
                "https://n.example/good".to_string(),
            ]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(status.progress, 100);
    assert!(status
        .logs
        .iter()
        .any(|e| e.message.contains("summarize failed for https://n.example/bad")));

    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].source_url, "https://n.example/good");
}

#[tokio::test]
async fn fetch_timeout_is_a_per_item_failure() {
    let scraper = StubScraper::default()
        .with_slow_content("https://n.example/slow", "Body.", Duration::from_millis(1500))
        .with_content("https://n.example/fast", "Fast article body.");
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        fetch_timeout_seconds: 1,
        ..test_config()
    };
    let controller = controller_with_config(scraper, StubSummarizer::new(), store.clone(), config);

    controller
        .start(
            UrlSource::Explicit(vec![
                "https://n.example/slow".to_string(),
                "https://n.example/fast".to_string(),
            ]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(status.progress, 100);
    assert!(status.logs.iter().any(|e| {
        e.message
            .contains("fetch failed for https://n.example/slow: timed out after 1s")
    }));

    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].source_url, "https://n.example/fast");
}

#[tokio::test]
async fn summarize_timeout_is_a_per_item_failure() {
    let scraper = StubScraper::default()
        .with_content("https://n.example/slow", "SLOW article body.")
        .with_content("https://n.example/fast", "Fast article body.");
    let summarizer = StubSummarizer::new().with_slow_delay(Duration::from_millis(1500));
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        summarize_timeout_seconds: 1,
        ..test_config()
    };
    let controller = controller_with_config(scraper, summarizer, store.clone(), config);

    controller
        .start(
            UrlSource::Explicit(vec![
                "https://n.example/slow".to_string(),
                "https://n.example/fast".to_string(),
            ]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(status.progress, 100);
    assert!(status.logs.iter().any(|e| {
        e.message
            .contains("summarize failed for https://n.example/slow: timed out after 1s")
    }));

    // The timed-out item persists nothing; only the fast one lands.
    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].source_url, "https://n.example/fast");
}

#[tokio::test]
async fn stop_while_idle_does_not_poison_the_next_run() {
    let scraper = StubScraper::default().with_content("https://n.example/a", "Article A body.");
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, StubSummarizer::new(), store.clone());

    // A stop with no run active must not cancel the run started after it.
    controller.stop().await;

    controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(store.summaries().await.len(), 1);
}

#[tokio::test]
async fn malformed_model_output_is_persisted_raw_without_payload() {
    let scraper = StubScraper::default().with_content("https://n.example/a", "An article.");
    let summarizer =
        StubSummarizer::new().with_response("An article.", "total gibberish, no json here");
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, summarizer, store.clone());

    controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);

    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].payload.is_none());
    assert_eq!(summaries[0].raw_response, "total gibberish, no json here");
}

#[tokio::test]
async fn payload_fields_are_normalized_on_the_way_in() {
    let response = r#"```json
{
    "summary": "Chipmaker beats estimates.",
    "sentiment": "Bullish",
    "companies_mentioned": ["Nvidia"],
    "time_horizon": "short term",
    "confidence_score": 1.4
}
```"#;
    let scraper = StubScraper::default().with_content("https://n.example/a", "An article.");
    let summarizer = StubSummarizer::new().with_response("An article.", response);
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(scraper, summarizer, store.clone());

    controller
        .start(
            UrlSource::Explicit(vec!["https://n.example/a".to_string()]),
            RunOptions::default(),
        )
        .await
        .unwrap();
    wait_until_idle(&controller).await;

    let summaries = store.summaries().await;
    let payload = summaries[0].payload.as_ref().unwrap();
    assert_eq!(payload.summary, "Chipmaker beats estimates.");
    assert_eq!(payload.sentiment, news_pipeline::Sentiment::Unknown);
    assert_eq!(
        payload.time_horizon,
        Some(news_pipeline::TimeHorizon::ShortTerm)
    );
    assert_eq!(payload.confidence_score, Some(1.0));
}

#[tokio::test]
async fn latest_batch_with_empty_store_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(StubScraper::default(), StubSummarizer::new(), store);

    controller
        .start(UrlSource::LatestBatch, RunOptions::default())
        .await
        .unwrap();

    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Error);
    assert!(status
        .logs
        .iter()
        .any(|e| e.message.contains("no collected batch")));
}

#[tokio::test]
async fn collected_batch_feeds_a_full_run() {
    let scraper = StubScraper::default()
        .with_links("https://site-a.example/", &["/story-1", "/story-2"])
        .with_content("https://site-a.example/story-1", "Story one body.")
        .with_content("https://site-a.example/story-2", "Story two body.");
    let store = Arc::new(MemoryStore::new());
    store.add_source("A", "https://site-a.example/", "General", true).await;
    let controller = controller_with(scraper, StubSummarizer::new(), store.clone());

    let batch = controller.collect_now(None, ScrapeMode::Direct).await.unwrap();
    assert_eq!(batch.urls.len(), 2);

    controller
        .start(UrlSource::LatestBatch, RunOptions::default())
        .await
        .unwrap();
    let status = wait_until_idle(&controller).await;
    assert_eq!(status.phase, PipelinePhase::Completed);
    assert_eq!(store.summaries().await.len(), 2);
}
