//! In-process implementation of the store contract. Backs the test suite
//! and demos; production deployments use `SqliteStore`.

use crate::traits::Store;
use crate::types::{CollectionBatch, NewsSource, PipelineError, Result, Summary};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    sources: Vec<NewsSource>,
    batches: Vec<CollectionBatch>,
    summaries: Vec<Summary>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source and return its id. Sources keep registration order.
    pub async fn add_source(
        &self,
        name: &str,
        url: &str,
        category: &str,
        active: bool,
    ) -> i64 {
        let mut inner = self.inner.write().await;
        let id = inner.sources.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        inner.sources.push(NewsSource {
            id,
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            description: String::new(),
            active,
            added_at: Utc::now(),
            last_collected: None,
            collection_count: 0,
            avg_articles_found: 0.0,
        });
        id
    }

    pub async fn source(&self, id: i64) -> Option<NewsSource> {
        self.inner
            .read()
            .await
            .sources
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn summaries(&self) -> Vec<Summary> {
        self.inner.read().await.summaries.clone()
    }

    pub async fn batches(&self) -> Vec<CollectionBatch> {
        self.inner.read().await.batches.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_active_sources(&self) -> Result<Vec<NewsSource>> {
        Ok(self
            .inner
            .read()
            .await
            .sources
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn update_source_stats(
        &self,
        source_id: i64,
        articles_found: usize,
        success: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let source = inner
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or(PipelineError::SourceNotFound { id: source_id })?;

        source.collection_count += 1;
        // Incremental running mean; no history is retained.
        let count = source.collection_count as f64;
        source.avg_articles_found += (articles_found as f64 - source.avg_articles_found) / count;
        if success {
            source.last_collected = Some(Utc::now());
        }
        Ok(())
    }

    async fn save_batch(&self, batch: &CollectionBatch) -> Result<()> {
        self.inner.write().await.batches.push(batch.clone());
        Ok(())
    }

    async fn get_latest_batch(&self) -> Result<Option<CollectionBatch>> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .iter()
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn save_summary(&self, summary: &Summary) -> Result<()> {
        self.inner.write().await.summaries.push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn running_mean_matches_arithmetic_mean() {
        let store = MemoryStore::new();
        let id = store.add_source("a", "https://a.example", "General", true).await;

        let yields = [3usize, 7, 0, 12, 5];
        for y in yields {
            store.update_source_stats(id, y, true).await.unwrap();
        }

        let source = store.source(id).await.unwrap();
        let expected = yields.iter().sum::<usize>() as f64 / yields.len() as f64;
        assert!((source.avg_articles_found - expected).abs() < 1e-9);
        assert_eq!(source.collection_count, yields.len() as u32);
    }

    #[tokio::test]
    async fn failed_attempts_count_but_do_not_touch_last_collected() {
        let store = MemoryStore::new();
        let id = store.add_source("b", "https://b.example", "General", true).await;

        store.update_source_stats(id, 0, false).await.unwrap();
        let source = store.source(id).await.unwrap();
        assert_eq!(source.collection_count, 1);
        assert!(source.last_collected.is_none());

        store.update_source_stats(id, 4, true).await.unwrap();
        let source = store.source(id).await.unwrap();
        assert_eq!(source.collection_count, 2);
        assert!(source.last_collected.is_some());
        assert!((source.avg_articles_found - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn latest_batch_is_the_newest_saved() {
        let store = MemoryStore::new();
        let first = CollectionBatch::new();
        // Batches are snapshots; created_at orders them.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = CollectionBatch::new();

        store.save_batch(&first).await.unwrap();
        store.save_batch(&second).await.unwrap();

        let latest = store.get_latest_batch().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn stats_for_unknown_source_fail() {
        let store = MemoryStore::new();
        let err = store.update_source_stats(42, 1, true).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound { id: 42 }));
    }
}
