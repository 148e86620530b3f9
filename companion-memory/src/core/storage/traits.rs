//! Storage trait definitions
//!
//! These traits define the interface for storage backends.
//! Implementations can be in-memory, Neo4j-backed, Meilisearch-backed, or
//! any other storage system.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{MemoryChunk, RelationshipRecord};

/// Primary durable store for memory records
///
/// Implementations must be thread-safe (Send + Sync) as they will be
/// shared across multiple async tasks. A successful `insert` must be
/// visible to the next read from the same caller.
#[async_trait]
pub trait MemoryRecordStore: Send + Sync {
    /// Insert a new record. Records are never updated in place.
    async fn insert(&self, memory: &MemoryChunk) -> Result<()>;

    /// Get a record by memory id
    async fn get(&self, memory_id: &str) -> Result<Option<MemoryChunk>>;

    /// All records owned by `owner_id`, oldest first
    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<MemoryChunk>>;

    /// Records for one `(owner, partner)` pair, oldest first
    async fn find_by_pair(&self, owner_id: &str, partner_id: &str) -> Result<Vec<MemoryChunk>>;
}

/// Store for per-pair favorability state
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn get(&self, owner_id: &str, partner_id: &str) -> Result<Option<RelationshipRecord>>;

    /// Insert or replace the record keyed by `(owner_id, partner_id)`
    async fn upsert(&self, record: &RelationshipRecord) -> Result<()>;

    /// All relationships of `owner_id`
    async fn list(&self, owner_id: &str) -> Result<Vec<RelationshipRecord>>;
}

/// A document in a similarity collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub document: VectorDocument,
    pub score: f64,
}

/// Nearest-neighbour collection driver
///
/// Collections are created lazily and documents are upserted by id.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Check the backend is reachable
    async fn health(&self) -> Result<()>;

    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Delete the collection and every document in it
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Insert or replace documents by id
    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Up to `limit` hits, best first
    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<VectorHit>>;

    async fn count(&self, collection: &str) -> Result<usize>;
}
