//! Meilisearch-backed similarity collections
//!
//! Each collection is one Meilisearch index keyed by `id`. Ranking comes
//! from Meilisearch's relevancy score (`_rankingScore`, 0..1).
//!
//! ## Index settings
//!
//! - Searchable: text
//! - Filterable: owner_id

use anyhow::Result;
use async_trait::async_trait;
use meilisearch_sdk::client::Client;
use meilisearch_sdk::search::SearchResults;
use meilisearch_sdk::settings::Settings;
use tracing::{debug, info};

use super::traits::{VectorBackend, VectorDocument, VectorHit};

/// Configuration for Meilisearch connection
#[derive(Clone, Debug)]
pub struct MeilisearchConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for MeilisearchConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("MEILISEARCH_URL")
                .unwrap_or_else(|_| "http://localhost:7700".to_string()),
            api_key: std::env::var("MEILISEARCH_KEY").ok(),
        }
    }
}

/// Meilisearch implementation of VectorBackend
#[derive(Clone)]
pub struct MeilisearchVectorBackend {
    client: Client,
}

impl MeilisearchVectorBackend {
    /// Create a new Meilisearch backend
    pub fn new(config: MeilisearchConfig) -> Result<Self> {
        info!("Using Meilisearch at {}", config.url);
        let client = Client::new(&config.url, config.api_key.as_deref())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VectorBackend for MeilisearchVectorBackend {
    async fn health(&self) -> Result<()> {
        self.client.health().await?;
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if let Ok(task) = self.client.create_index(collection, Some("id")).await {
            task.wait_for_completion(&self.client, None, None).await?;
        }

        let settings = Settings::new()
            .with_searchable_attributes(["text"])
            .with_filterable_attributes(["owner_id"]);
        self.client
            .index(collection)
            .set_settings(&settings)
            .await?
            .wait_for_completion(&self.client, None, None)
            .await?;

        debug!("Meilisearch index {} ready", collection);
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.client.get_index(collection).await.is_ok())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.client
            .index(collection)
            .delete()
            .await?
            .wait_for_completion(&self.client, None, None)
            .await?;
        info!("Dropped Meilisearch index {}", collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let index = self.client.index(collection);
        index
            .add_documents(&documents, Some("id"))
            .await?
            .wait_for_completion(&self.client, None, None)
            .await?;
        debug!("Indexed {} documents into {}", documents.len(), collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let index = self.client.index(collection);
        index.delete_document(id).await?;
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let index = self.client.index(collection);

        let mut search = index.search();
        search.with_query(text);
        search.with_limit(limit);
        search.with_show_ranking_score(true);

        let results: SearchResults<VectorDocument> = search.execute().await?;

        Ok(results
            .hits
            .into_iter()
            .map(|h| VectorHit {
                document: h.result,
                score: h.ranking_score.unwrap_or(0.0),
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let stats = self.client.index(collection).get_stats().await?;
        Ok(stats.number_of_documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_meilisearch_connection() {
        let backend = MeilisearchVectorBackend::new(MeilisearchConfig::default()).unwrap();
        backend.health().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_index_and_query() {
        let backend = MeilisearchVectorBackend::new(MeilisearchConfig::default()).unwrap();
        let collection = "companion_memories_test_user";
        backend.ensure_collection(collection).await.unwrap();

        backend
            .upsert(
                collection,
                vec![VectorDocument {
                    id: "mem_test_1".to_string(),
                    owner_id: "test_user".to_string(),
                    text: "talked about the garden and tomatoes".to_string(),
                    data: serde_json::Value::Null,
                }],
            )
            .await
            .unwrap();

        let hits = backend.query(collection, "tomatoes", 5).await.unwrap();
        assert!(!hits.is_empty());

        backend.drop_collection(collection).await.unwrap();
    }
}
