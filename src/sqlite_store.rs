//! SQLite-backed implementation of the store contract.
//!
//! Tables: sources, collection batches, collected URLs (unique per batch)
//! and article summaries, with list columns stored as JSON text.

use crate::traits::Store;
use crate::types::{CollectedUrl, CollectionBatch, NewsSource, PipelineError, Result, Summary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL DEFAULT 'General',
                description TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                added_at TEXT NOT NULL,
                last_collected TEXT,
                collection_count INTEGER NOT NULL DEFAULT 0,
                avg_articles_found REAL NOT NULL DEFAULT 0.0
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                total_urls INTEGER NOT NULL DEFAULT 0,
                sources_count INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collected_urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                domain TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                collection_batch_id TEXT NOT NULL,
                FOREIGN KEY (source_id) REFERENCES news_sources (id) ON DELETE CASCADE,
                FOREIGN KEY (collection_batch_id)
                    REFERENCES collection_batches (batch_id) ON DELETE CASCADE,
                UNIQUE(url, collection_batch_id)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                summary_id TEXT NOT NULL UNIQUE,
                source_url TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                model_used TEXT NOT NULL,
                raw_response TEXT NOT NULL,
                summary TEXT,
                investment_implications TEXT,
                key_metrics TEXT,
                companies_mentioned TEXT,
                sectors_affected TEXT,
                sentiment TEXT,
                risk_factors TEXT,
                opportunities TEXT,
                time_horizon TEXT,
                confidence_score REAL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_collected_urls_batch_id ON collected_urls(collection_batch_id)",
            "CREATE INDEX IF NOT EXISTS idx_collected_urls_source_id ON collected_urls(source_id)",
            "CREATE INDEX IF NOT EXISTS idx_news_sources_active ON news_sources(active)",
            "CREATE INDEX IF NOT EXISTS idx_article_summaries_processed_at ON article_summaries(processed_at)",
            "CREATE INDEX IF NOT EXISTS idx_article_summaries_sentiment ON article_summaries(sentiment)",
        ] {
            sqlx::query(statement).execute(&self.db).await?;
        }

        debug!("database schema ensured");
        Ok(())
    }

    pub async fn add_source(
        &self,
        name: &str,
        url: &str,
        category: &str,
        description: &str,
        active: bool,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO news_sources (name, url, category, description, active, added_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(category)
        .bind(description)
        .bind(active)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!("added news source '{}' ({})", name, url);
        Ok(result.last_insert_rowid())
    }

    pub async fn list_sources(&self, active_only: bool) -> Result<Vec<NewsSource>> {
        let query = if active_only {
            "SELECT * FROM news_sources WHERE active = 1 ORDER BY id"
        } else {
            "SELECT * FROM news_sources ORDER BY id"
        };
        let rows = sqlx::query(query).fetch_all(&self.db).await?;
        rows.iter().map(source_from_row).collect()
    }

    /// Seed the source table with the default finance sources when it is
    /// empty; a no-op otherwise.
    pub async fn seed_default_sources(&self) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM news_sources")
            .fetch_one(&self.db)
            .await?;
        if count > 0 {
            return Ok(());
        }

        let defaults = [
            ("CoinDesk", "https://www.coindesk.com/", "Cryptocurrency"),
            ("MarketWatch Investing", "https://www.marketwatch.com/investing", "Stock Market"),
            ("Yahoo Finance News", "https://finance.yahoo.com/news", "General Finance"),
            ("CNBC Investing", "https://www.cnbc.com/investing/", "Business News"),
            ("Reuters Business & Finance", "https://www.reuters.com/business/finance/", "Business News"),
            ("Bloomberg Markets", "https://www.bloomberg.com/markets", "Markets"),
        ];
        for (name, url, category) in defaults {
            self.add_source(name, url, category, "", true).await?;
        }
        info!("seeded {} default news sources", defaults.len());
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_active_sources(&self) -> Result<Vec<NewsSource>> {
        self.list_sources(true).await
    }

    async fn update_source_stats(
        &self,
        source_id: i64,
        articles_found: usize,
        success: bool,
    ) -> Result<()> {
        // Single statement so concurrent readers never see a partially
        // updated counter; all expressions evaluate against the old row.
        let result = sqlx::query(
            r#"
            UPDATE news_sources
            SET avg_articles_found =
                    avg_articles_found + ((? - avg_articles_found) / (collection_count + 1)),
                collection_count = collection_count + 1,
                last_collected = CASE WHEN ? THEN ? ELSE last_collected END
            WHERE id = ?
            "#,
        )
        .bind(articles_found as f64)
        .bind(success)
        .bind(Utc::now())
        .bind(source_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::SourceNotFound { id: source_id });
        }
        Ok(())
    }

    async fn save_batch(&self, batch: &CollectionBatch) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let sources_count = {
            let mut ids: Vec<i64> = batch.urls.iter().map(|u| u.source_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len() as i64
        };

        sqlx::query(
            r#"
            INSERT INTO collection_batches (batch_id, created_at, total_urls, sources_count, completed)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(batch.id.to_string())
        .bind(batch.created_at)
        .bind(batch.urls.len() as i64)
        .bind(sources_count)
        .execute(&mut *tx)
        .await?;

        for url in &batch.urls {
            sqlx::query(
                r#"
                INSERT INTO collected_urls (source_id, url, domain, collected_at, collection_batch_id)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(url.source_id)
            .bind(&url.url)
            .bind(&url.domain)
            .bind(url.collected_at)
            .bind(batch.id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("saved batch {} with {} url(s)", batch.id, batch.urls.len());
        Ok(())
    }

    async fn get_latest_batch(&self) -> Result<Option<CollectionBatch>> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, created_at FROM collection_batches
            WHERE completed = 1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let batch_id: String = row.try_get("batch_id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let id = Uuid::parse_str(&batch_id)
            .map_err(|e| PipelineError::General(format!("corrupt batch id: {e}")))?;

        let url_rows = sqlx::query(
            r#"
            SELECT source_id, url, domain, collected_at FROM collected_urls
            WHERE collection_batch_id = ?
            ORDER BY id
            "#,
        )
        .bind(&batch_id)
        .fetch_all(&self.db)
        .await?;

        let mut urls = Vec::with_capacity(url_rows.len());
        for row in url_rows {
            urls.push(CollectedUrl {
                source_id: row.try_get("source_id")?,
                url: row.try_get("url")?,
                domain: row.try_get("domain")?,
                collected_at: row.try_get("collected_at")?,
            });
        }

        Ok(Some(CollectionBatch {
            id,
            created_at,
            urls,
        }))
    }

    async fn save_summary(&self, summary: &Summary) -> Result<()> {
        let payload = summary.payload.as_ref();
        sqlx::query(
            r#"
            INSERT INTO article_summaries (
                summary_id, source_url, processed_at, model_used, raw_response,
                summary, investment_implications, key_metrics, companies_mentioned,
                sectors_affected, sentiment, risk_factors, opportunities,
                time_horizon, confidence_score
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(summary.id.to_string())
        .bind(&summary.source_url)
        .bind(summary.processed_at)
        .bind(&summary.model_used)
        .bind(&summary.raw_response)
        .bind(payload.map(|p| p.summary.clone()))
        .bind(payload.map(|p| p.investment_implications.clone()))
        .bind(json_list(payload.map(|p| &p.key_metrics))?)
        .bind(json_list(payload.map(|p| &p.companies_mentioned))?)
        .bind(json_list(payload.map(|p| &p.sectors_affected))?)
        .bind(payload.map(|p| p.sentiment.as_str()))
        .bind(json_list(payload.map(|p| &p.risk_factors))?)
        .bind(json_list(payload.map(|p| &p.opportunities))?)
        .bind(payload.and_then(|p| p.time_horizon).map(|h| h.as_str()))
        .bind(payload.and_then(|p| p.confidence_score))
        .execute(&self.db)
        .await?;

        debug!("persisted summary {} for {}", summary.id, summary.source_url);
        Ok(())
    }
}

fn json_list(list: Option<&Vec<String>>) -> Result<Option<String>> {
    match list {
        Some(items) => Ok(Some(serde_json::to_string(items)?)),
        None => Ok(None),
    }
}

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NewsSource> {
    Ok(NewsSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        added_at: row.try_get("added_at")?,
        last_collected: row.try_get("last_collected")?,
        collection_count: row.try_get::<i64, _>("collection_count")? as u32,
        avg_articles_found: row.try_get("avg_articles_found")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqliteStore, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("news-pipeline-test-{}.db", Uuid::new_v4()));
        let store = SqliteStore::connect(&path).await.unwrap();
        (store, path)
    }

    #[tokio::test]
    async fn latest_batch_ties_break_toward_the_later_insert() {
        let (store, path) = temp_store().await;

        // Same created_at tick; the later insert must win.
        let created_at = Utc::now();
        let first = CollectionBatch {
            id: Uuid::new_v4(),
            created_at,
            urls: Vec::new(),
        };
        let second = CollectionBatch {
            id: Uuid::new_v4(),
            created_at,
            urls: Vec::new(),
        };
        store.save_batch(&first).await.unwrap();
        store.save_batch(&second).await.unwrap();

        let latest = store.get_latest_batch().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        drop(store);
        let _ = std::fs::remove_file(path);
    }
}
