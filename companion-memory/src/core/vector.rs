//! Per-owner similarity index over memory summaries
//!
//! The index is derived data: every entry can be rebuilt from the memory
//! store, so indexing failures never propagate to callers. Failed ids are
//! remembered per owner and can be retried with [`VectorIndexService::retry_pending`],
//! or the whole collection can be rebuilt with [`VectorIndexService::rebuild_index`].

use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::core::memory_store::MemoryStore;
use crate::core::storage::{VectorBackend, VectorDocument};
use crate::models::{MemoryChunk, MemoryContent, MemoryError, MemoryResult};

static OWNER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

const MIN_COLLECTION_NAME: usize = 3;
const MAX_COLLECTION_NAME: usize = 63;
/// Hex characters of the owner digest used in hashed collection names.
const OWNER_DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorConfig {
    pub collection_prefix: String,
    pub rebuild_batch_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            collection_prefix: "companion_memories".to_string(),
            rebuild_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl IndexOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMemory {
    pub memory_id: String,
    pub score: f64,
    pub content: MemoryContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildProgress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub owner_id: String,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub retried: usize,
    pub succeeded: usize,
    /// Ids no longer present in the memory store.
    pub missing: usize,
    pub still_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub owner_id: String,
    pub collection: String,
    pub exists: bool,
    pub document_count: usize,
    pub pending_reindex: usize,
}

pub struct VectorIndexService {
    backend: Arc<dyn VectorBackend>,
    config: VectorConfig,
    initialized: AtomicBool,
    ready_collections: DashSet<String>,
    pending: DashMap<String, HashSet<String>>,
}

impl VectorIndexService {
    pub fn new(backend: Arc<dyn VectorBackend>, config: VectorConfig) -> Self {
        Self {
            backend,
            config,
            initialized: AtomicBool::new(false),
            ready_collections: DashSet::new(),
            pending: DashMap::new(),
        }
    }

    /// Check the backend once. Collections themselves are created lazily.
    pub async fn initialize(&self) -> bool {
        if self.initialized.load(Ordering::SeqCst) {
            return true;
        }
        match self.backend.health().await {
            Ok(()) => {
                self.initialized.store(true, Ordering::SeqCst);
                info!("Vector index initialized");
                true
            },
            Err(e) => {
                warn!("Vector backend not available: {}", e);
                false
            },
        }
    }

    /// Collection for `owner_id`.
    ///
    /// Ids that are not safe as a collection suffix, or would make the name
    /// too long, map to `<prefix>__<sha256 hex>`. A plain id never starts
    /// with `_`, so the two forms cannot collide.
    pub fn collection_name(&self, owner_id: &str) -> MemoryResult<String> {
        if owner_id.trim().is_empty() {
            return Err(MemoryError::InvalidOwnerId(owner_id.to_string()));
        }

        let plain = format!("{}_{}", self.config.collection_prefix, owner_id);
        let name = if OWNER_ID_PATTERN.is_match(owner_id) && plain.len() <= MAX_COLLECTION_NAME {
            plain
        } else {
            format!(
                "{}__{}",
                self.config.collection_prefix,
                owner_digest(owner_id)
            )
        };

        if !(MIN_COLLECTION_NAME..=MAX_COLLECTION_NAME).contains(&name.len()) {
            return Err(MemoryError::InvalidOwnerId(owner_id.to_string()));
        }
        Ok(name)
    }

    async fn ensure_collection(&self, owner_id: &str) -> MemoryResult<String> {
        let name = self.collection_name(owner_id)?;
        if self.ready_collections.contains(&name) {
            return Ok(name);
        }
        self.backend
            .ensure_collection(&name)
            .await
            .map_err(MemoryError::index)?;
        self.ready_collections.insert(name.clone());
        debug!("Collection {} ready", name);
        Ok(name)
    }

    /// Upsert one memory by id. Never fails the caller; failures are recorded
    /// for a later `retry_pending`.
    pub async fn index_memory(
        &self,
        owner_id: &str,
        memory_id: &str,
        content: &MemoryContent,
    ) -> IndexOutcome {
        let text = content.index_text().trim();
        if text.is_empty() {
            return IndexOutcome::failed("memory has no text to index");
        }

        let document = match serde_json::to_value(content) {
            Ok(data) => VectorDocument {
                id: memory_id.to_string(),
                owner_id: owner_id.to_string(),
                text: text.to_string(),
                data,
            },
            Err(e) => return IndexOutcome::failed(e.to_string()),
        };

        let result = match self.ensure_collection(owner_id).await {
            Ok(collection) => {
                let upserted = self.backend.upsert(&collection, vec![document]).await;
                if upserted.is_err() {
                    // The collection may be gone; recreate it on the next attempt.
                    self.ready_collections.remove(&collection);
                }
                upserted.map_err(MemoryError::index)
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.clear_pending(owner_id, memory_id);
                debug!("Indexed memory {} for {}", memory_id, owner_id);
                IndexOutcome::ok()
            },
            Err(MemoryError::InvalidOwnerId(id)) => {
                warn!("Cannot index memory {}: invalid owner id {:?}", memory_id, id);
                IndexOutcome::failed(format!("invalid owner id: {id}"))
            },
            Err(e) => {
                warn!(
                    "Failed to index memory {} for {}: {}",
                    memory_id, owner_id, e
                );
                self.pending
                    .entry(owner_id.to_string())
                    .or_default()
                    .insert(memory_id.to_string());
                IndexOutcome::failed(e.to_string())
            },
        }
    }

    /// Up to `limit` memories of `owner_id` most similar to `query`, best first.
    ///
    /// Any backend failure yields an empty result.
    pub async fn search_similar(
        &self,
        owner_id: &str,
        query: &str,
        limit: usize,
    ) -> Vec<SimilarMemory> {
        if limit == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let collection = match self.collection_name(owner_id) {
            Ok(name) => name,
            Err(e) => {
                warn!("Search skipped: {}", e);
                return Vec::new();
            },
        };

        match self.backend.collection_exists(&collection).await {
            Ok(true) => {},
            Ok(false) => return Vec::new(),
            Err(e) => {
                warn!("Vector search for {} failed: {}", owner_id, e);
                return Vec::new();
            },
        }

        let hits = match self.backend.query(&collection, query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector search for {} failed: {}", owner_id, e);
                return Vec::new();
            },
        };

        let mut results: Vec<SimilarMemory> = hits
            .into_iter()
            .filter(|hit| hit.document.owner_id == owner_id)
            .map(|hit| {
                let document = hit.document;
                let content = serde_json::from_value(document.data).unwrap_or(MemoryContent {
                    raw: document.text,
                    ..Default::default()
                });
                SimilarMemory {
                    memory_id: document.id,
                    score: hit.score,
                    content,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        results
    }

    pub async fn rebuild_index(
        &self,
        owner_id: &str,
        memories: &BTreeMap<String, Vec<MemoryChunk>>,
    ) -> MemoryResult<RebuildReport> {
        self.rebuild_index_with_progress(owner_id, memories, |_| {})
            .await
    }

    /// Drop the owner's collection and re-index every memory in batches.
    ///
    /// `memories` is the output of `MemoryStore::load_user_memories`.
    pub async fn rebuild_index_with_progress<F>(
        &self,
        owner_id: &str,
        memories: &BTreeMap<String, Vec<MemoryChunk>>,
        mut on_progress: F,
    ) -> MemoryResult<RebuildReport>
    where
        F: FnMut(RebuildProgress),
    {
        let collection = self.collection_name(owner_id)?;
        info!("Rebuilding vector index {} for {}", collection, owner_id);

        self.backend
            .drop_collection(&collection)
            .await
            .map_err(MemoryError::index)?;
        self.ready_collections.remove(&collection);
        self.pending.remove(owner_id);
        self.ensure_collection(owner_id).await?;

        let documents: Vec<VectorDocument> = memories
            .values()
            .flatten()
            .filter(|m| {
                if m.owner_id != owner_id {
                    warn!("Skipping memory {} owned by {}", m.memory_id, m.owner_id);
                    return false;
                }
                !m.content.index_text().trim().is_empty()
            })
            .filter_map(|m| {
                let data = serde_json::to_value(&m.content).ok()?;
                Some(VectorDocument {
                    id: m.memory_id.clone(),
                    owner_id: owner_id.to_string(),
                    text: m.content.index_text().trim().to_string(),
                    data,
                })
            })
            .collect();

        let total = documents.len();
        let batch_size = self.config.rebuild_batch_size.max(1);
        let mut report = RebuildReport {
            owner_id: owner_id.to_string(),
            total,
            indexed: 0,
            failed: 0,
            batches: 0,
        };

        for batch in documents.chunks(batch_size) {
            report.batches += 1;
            match self.backend.upsert(&collection, batch.to_vec()).await {
                Ok(()) => report.indexed += batch.len(),
                Err(e) => {
                    warn!(
                        "Rebuild batch {} for {} failed: {}",
                        report.batches, owner_id, e
                    );
                    report.failed += batch.len();
                    let mut pending = self.pending.entry(owner_id.to_string()).or_default();
                    pending.extend(batch.iter().map(|d| d.id.clone()));
                },
            }
            on_progress(RebuildProgress {
                processed: report.indexed + report.failed,
                total,
            });
        }

        info!(
            "Rebuilt index for {}: {}/{} indexed in {} batches",
            owner_id, report.indexed, report.total, report.batches
        );
        Ok(report)
    }

    /// Re-index memories whose earlier indexing failed.
    pub async fn retry_pending(
        &self,
        owner_id: &str,
        store: &MemoryStore,
    ) -> MemoryResult<RetryReport> {
        let ids: Vec<String> = self
            .pending
            .get(owner_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut report = RetryReport {
            retried: ids.len(),
            succeeded: 0,
            missing: 0,
            still_pending: 0,
        };

        for id in ids {
            match store.get(&id).await? {
                Some(memory) => {
                    if self
                        .index_memory(owner_id, &memory.memory_id, &memory.content)
                        .await
                        .success
                    {
                        report.succeeded += 1;
                    }
                },
                None => {
                    self.clear_pending(owner_id, &id);
                    report.missing += 1;
                },
            }
        }

        report.still_pending = self.pending_count(owner_id);
        Ok(report)
    }

    pub async fn remove_memory(&self, owner_id: &str, memory_id: &str) -> MemoryResult<()> {
        let collection = self.collection_name(owner_id)?;
        self.clear_pending(owner_id, memory_id);
        self.backend
            .delete(&collection, memory_id)
            .await
            .map_err(MemoryError::index)
    }

    pub async fn index_exists(&self, owner_id: &str) -> bool {
        match self.collection_name(owner_id) {
            Ok(collection) => self
                .backend
                .collection_exists(&collection)
                .await
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn index_stats(&self, owner_id: &str) -> MemoryResult<IndexStats> {
        let collection = self.collection_name(owner_id)?;
        let exists = self
            .backend
            .collection_exists(&collection)
            .await
            .map_err(MemoryError::index)?;
        let document_count = if exists {
            self.backend
                .count(&collection)
                .await
                .map_err(MemoryError::index)?
        } else {
            0
        };

        Ok(IndexStats {
            owner_id: owner_id.to_string(),
            collection,
            exists,
            document_count,
            pending_reindex: self.pending_count(owner_id),
        })
    }

    pub fn pending_count(&self, owner_id: &str) -> usize {
        self.pending.get(owner_id).map(|set| set.len()).unwrap_or(0)
    }

    fn clear_pending(&self, owner_id: &str, memory_id: &str) {
        if let Some(mut set) = self.pending.get_mut(owner_id) {
            set.remove(memory_id);
        }
    }
}

fn owner_digest(owner_id: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(owner_id.as_bytes()));
    digest[..OWNER_DIGEST_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::InMemoryVectorBackend;
    use crate::models::NewMemory;

    fn service() -> (Arc<InMemoryVectorBackend>, VectorIndexService) {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let service = VectorIndexService::new(backend.clone(), VectorConfig::default());
        (backend, service)
    }

    fn content(summary: &str) -> MemoryContent {
        NewMemory::raw(format!("user: {summary}"))
            .with_summary(summary)
            .content
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (backend, service) = service();
        assert!(service.initialize().await);
        backend.set_available(false);
        assert!(service.initialize().await);
    }

    #[tokio::test]
    async fn test_initialize_reports_unavailable_backend() {
        let (backend, service) = service();
        backend.set_available(false);
        assert!(!service.initialize().await);
        backend.set_available(true);
        assert!(service.initialize().await);
    }

    #[test]
    fn test_collection_name_validation() {
        let (_, service) = service();
        assert_eq!(
            service.collection_name("user_42").unwrap(),
            "companion_memories_user_42"
        );
        assert!(service.collection_name("").is_err());
        assert!(service.collection_name("   ").is_err());
    }

    #[test]
    fn test_unsafe_owner_ids_get_hashed_collections() {
        let (_, service) = service();
        let long = "x".repeat(50);
        let owners = ["user.1", "a@b.com", "张三", "_hidden", long.as_str()];

        let names: HashSet<String> = owners
            .iter()
            .map(|owner| {
                let name = service.collection_name(owner).unwrap();
                assert!(name.starts_with("companion_memories__"), "{name}");
                assert!(name.len() <= MAX_COLLECTION_NAME);
                assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
                assert_eq!(service.collection_name(owner).unwrap(), name);
                name
            })
            .collect();
        assert_eq!(names.len(), owners.len());

        let edge = "y".repeat(MAX_COLLECTION_NAME - "companion_memories_".len());
        assert_eq!(
            service.collection_name(&edge).unwrap(),
            format!("companion_memories_{edge}")
        );
    }

    #[tokio::test]
    async fn test_every_stored_owner_can_be_indexed_and_rebuilt() {
        let (_, service) = service();
        let store = MemoryStore::in_memory();
        let long = "x".repeat(50);

        for owner in ["user.1", "a@b.com", "张三", long.as_str()] {
            let saved = store
                .save_memory(owner, "bob", NewMemory::raw("user: 我喜欢种花").with_summary("喜欢种花"))
                .await
                .unwrap();
            let outcome = service
                .index_memory(owner, &saved.memory_id, &saved.memory.content)
                .await;
            assert!(outcome.success, "{owner}: {:?}", outcome.error);
            assert_eq!(service.search_similar(owner, "种花", 5).await.len(), 1);

            let memories = store.load_user_memories(owner).await.unwrap();
            let report = service.rebuild_index(owner, &memories).await.unwrap();
            assert_eq!(report.indexed, 1, "{owner}");
        }
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_owner_and_limited() {
        let (_, service) = service();
        for i in 0..5 {
            let outcome = service
                .index_memory("alice", &format!("mem_a{i}"), &content("聊了天气和下雨"))
                .await;
            assert!(outcome.success);
        }
        service
            .index_memory("bob", "mem_b0", &content("聊了天气和下雨"))
            .await;

        let results = service.search_similar("alice", "下雨", 3).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.memory_id.starts_with("mem_a")));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_reindex_replaces_content() {
        let (_, service) = service();
        service
            .index_memory("alice", "mem_1", &content("talked about the garden"))
            .await;
        service
            .index_memory("alice", "mem_1", &content("talked about grandchildren visiting"))
            .await;

        let results = service.search_similar("alice", "grandchildren", 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].content.processed.summary,
            "talked about grandchildren visiting"
        );
        assert!(service.search_similar("alice", "garden", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_failed_searches_return_nothing() {
        let (backend, service) = service();
        assert!(service.search_similar("alice", "anything", 5).await.is_empty());
        service
            .index_memory("alice", "mem_1", &content("garden"))
            .await;
        assert!(service.search_similar("alice", "garden", 0).await.is_empty());

        backend.set_available(false);
        assert!(service.search_similar("alice", "garden", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_index_is_pending_then_retried() {
        let (backend, service) = service();
        let store = MemoryStore::in_memory();
        let saved = store
            .save_memory("alice", "bob", NewMemory::raw("user: 我喜欢种花").with_summary("喜欢种花"))
            .await
            .unwrap();

        backend.set_available(false);
        let outcome = service
            .index_memory("alice", &saved.memory_id, &saved.memory.content)
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(service.pending_count("alice"), 1);

        backend.set_available(true);
        let report = service.retry_pending("alice", &store).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.still_pending, 0);
        assert_eq!(service.search_similar("alice", "种花", 5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_collection_is_recreated_on_retry() {
        let (backend, service) = service();
        let store = MemoryStore::in_memory();
        let first = store
            .save_memory("alice", "bob", NewMemory::raw("user: 去公园散步").with_summary("公园散步"))
            .await
            .unwrap();
        let second = store
            .save_memory("alice", "bob", NewMemory::raw("user: 我喜欢种花").with_summary("喜欢种花"))
            .await
            .unwrap();

        assert!(
            service
                .index_memory("alice", &first.memory_id, &first.memory.content)
                .await
                .success
        );

        backend
            .drop_collection("companion_memories_alice")
            .await
            .unwrap();
        let outcome = service
            .index_memory("alice", &second.memory_id, &second.memory.content)
            .await;
        assert!(!outcome.success);
        assert_eq!(service.pending_count("alice"), 1);

        let report = service.retry_pending("alice", &store).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.still_pending, 0);
        assert_eq!(service.search_similar("alice", "种花", 5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_from_store() {
        let (_, service) = service();
        let store = MemoryStore::in_memory();
        for i in 0..7 {
            store
                .save_memory("alice", if i % 2 == 0 { "bob" } else { "carol" }, NewMemory::raw(format!("user: memory number {i}")))
                .await
                .unwrap();
        }
        service
            .index_memory("alice", "mem_stale", &content("stale entry"))
            .await;

        let memories = store.load_user_memories("alice").await.unwrap();
        let small_batches = VectorIndexService::new(
            Arc::new(InMemoryVectorBackend::new()),
            VectorConfig {
                rebuild_batch_size: 3,
                ..VectorConfig::default()
            },
        );
        let mut progress = Vec::new();
        let report = small_batches
            .rebuild_index_with_progress("alice", &memories, |p| progress.push(p.processed))
            .await
            .unwrap();
        assert_eq!(report.total, 7);
        assert_eq!(report.indexed, 7);
        assert_eq!(report.batches, 3);
        assert_eq!(progress, vec![3, 6, 7]);

        let report = service.rebuild_index("alice", &memories).await.unwrap();
        assert_eq!(report.indexed, 7);
        let stats = service.index_stats("alice").await.unwrap();
        assert_eq!(stats.document_count, 7);
        assert!(service.search_similar("alice", "stale", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_memory_and_stats() {
        let (_, service) = service();
        assert!(!service.index_exists("alice").await);
        service
            .index_memory("alice", "mem_1", &content("garden"))
            .await;
        assert!(service.index_exists("alice").await);

        service.remove_memory("alice", "mem_1").await.unwrap();
        let stats = service.index_stats("alice").await.unwrap();
        assert!(stats.exists);
        assert_eq!(stats.document_count, 0);
    }
}
