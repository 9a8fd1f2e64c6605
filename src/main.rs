use anyhow::Context;
use clap::Parser;
use news_pipeline::{
    HttpScraper, OllamaSummarizer, PipelineConfig, PipelineController, PipelinePhase, RunOptions,
    ScrapeMode, SqliteStore, UrlSource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "news-pipeline", about = "Collect, summarize and store investment news")]
struct Args {
    /// SQLite database path
    #[arg(long, default_value = "news_pipeline.db")]
    db: String,

    /// Explicit article URL to process (repeatable); skips collection
    #[arg(long = "url")]
    urls: Vec<String>,

    /// Process the most recently collected batch instead of collecting anew
    #[arg(long)]
    use_latest_batch: bool,

    /// Collect a fresh batch of URLs and exit without summarizing
    #[arg(long)]
    collect_only: bool,

    /// Ollama model to summarize with
    #[arg(long, default_value = "llama3.1:8b")]
    model: String,

    /// Base URL of the Ollama server
    #[arg(long, default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Request headless-browser scraping for JavaScript-heavy sources
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = PipelineConfig::default();
    let store = Arc::new(
        SqliteStore::connect(&args.db)
            .await
            .with_context(|| format!("opening database at {}", args.db))?,
    );
    store.seed_default_sources().await?;

    let scraper = Arc::new(HttpScraper::new(config.fetch_timeout_seconds)?);
    let summarizer = Arc::new(OllamaSummarizer::new(
        &args.ollama_url,
        config.max_article_chars,
    ));
    let controller = PipelineController::new(scraper, summarizer, store, config);

    let mode = if args.headless {
        ScrapeMode::Headless
    } else {
        ScrapeMode::Direct
    };

    if args.collect_only {
        let batch = controller.collect_now(None, mode).await?;
        info!("collected {} url(s) into batch {}", batch.urls.len(), batch.id);
        return Ok(());
    }

    let source = if !args.urls.is_empty() {
        UrlSource::Explicit(args.urls.clone())
    } else if args.use_latest_batch {
        UrlSource::LatestBatch
    } else {
        let batch = controller.collect_now(None, mode).await?;
        info!("collected {} url(s) into batch {}", batch.urls.len(), batch.id);
        UrlSource::LatestBatch
    };

    let options = RunOptions {
        model: args.model.clone(),
        scrape_mode: mode,
    };
    controller.start(source, options).await?;

    // Poll the status handle the way a UI would, surfacing fresh log lines.
    let mut printed = 0usize;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = controller.status().await;
        for entry in status.logs.iter().skip(printed) {
            info!("{}", entry.message);
        }
        printed = status.logs.len();

        if !status.running {
            if status.phase == PipelinePhase::Error {
                anyhow::bail!("pipeline run failed; see log output above");
            }
            info!("pipeline finished in phase {}", status.phase);
            break;
        }
    }

    Ok(())
}
