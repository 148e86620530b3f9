//! In-memory storage implementations
//!
//! These implementations store data in memory using thread-safe data structures.
//! Data is lost when the process exits.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::core::chunking::is_wide;
use crate::models::{MemoryChunk, RelationshipRecord};

use super::traits::{
    MemoryRecordStore, RelationshipStore, VectorBackend, VectorDocument, VectorHit,
};

/// In-memory implementation of MemoryRecordStore
///
/// Records are kept per owner in insertion order.
#[derive(Default)]
pub struct InMemoryMemoryRecordStore {
    by_owner: DashMap<String, Vec<MemoryChunk>>,
}

impl InMemoryMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRecordStore for InMemoryMemoryRecordStore {
    async fn insert(&self, memory: &MemoryChunk) -> Result<()> {
        let mut records = self.by_owner.entry(memory.owner_id.clone()).or_default();
        if records.iter().any(|m| m.memory_id == memory.memory_id) {
            bail!("memory {} already exists", memory.memory_id);
        }
        records.push(memory.clone());
        debug!(
            "Stored memory {} for {} -> {}",
            memory.memory_id, memory.owner_id, memory.partner_id
        );
        Ok(())
    }

    async fn get(&self, memory_id: &str) -> Result<Option<MemoryChunk>> {
        Ok(self.by_owner.iter().find_map(|entry| {
            entry
                .value()
                .iter()
                .find(|m| m.memory_id == memory_id)
                .cloned()
        }))
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<MemoryChunk>> {
        Ok(self
            .by_owner
            .get(owner_id)
            .map(|records| records.value().clone())
            .unwrap_or_default())
    }

    async fn find_by_pair(&self, owner_id: &str, partner_id: &str) -> Result<Vec<MemoryChunk>> {
        Ok(self
            .by_owner
            .get(owner_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|m| m.partner_id == partner_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// In-memory implementation of RelationshipStore
#[derive(Default)]
pub struct InMemoryRelationshipStore {
    records: DashMap<(String, String), RelationshipRecord>,
}

impl InMemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationshipStore for InMemoryRelationshipStore {
    async fn get(&self, owner_id: &str, partner_id: &str) -> Result<Option<RelationshipRecord>> {
        Ok(self
            .records
            .get(&(owner_id.to_string(), partner_id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: &RelationshipRecord) -> Result<()> {
        self.records.insert(
            (record.owner_id.clone(), record.partner_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<RelationshipRecord>> {
        let mut records: Vec<RelationshipRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.partner_id.cmp(&b.partner_id));
        Ok(records)
    }
}

const EMBEDDING_DIM: usize = 256;

struct StoredVector {
    document: VectorDocument,
    embedding: Vec<f32>,
}

/// In-memory implementation of VectorBackend
///
/// Uses hashed bag-of-terms embeddings (ASCII words, CJK unigrams and
/// bigrams) compared by cosine similarity. `set_available(false)` makes
/// every call fail, which simulates an unreachable vector database.
pub struct InMemoryVectorBackend {
    collections: RwLock<HashMap<String, HashMap<String, StoredVector>>>,
    available: AtomicBool,
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("vector backend unavailable")
        }
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn health(&self) -> Result<()> {
        self.check_available()
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.check_available()?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.collections.read().contains_key(collection))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.check_available()?;
        self.collections.write().remove(collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: Vec<VectorDocument>) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write();
        let entries = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection {} not found", collection))?;

        for document in documents {
            let embedding = embed(&document.text);
            entries.insert(
                document.id.clone(),
                StoredVector {
                    document,
                    embedding,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.check_available()?;
        if let Some(entries) = self.collections.write().get_mut(collection) {
            entries.remove(id);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<VectorHit>> {
        self.check_available()?;
        let query = embed(text);
        let collections = self.collections.read();
        let entries = collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection {} not found", collection))?;

        let mut hits: Vec<VectorHit> = entries
            .values()
            .map(|stored| VectorHit {
                document: stored.document.clone(),
                score: cosine_similarity(&query, &stored.embedding) as f64,
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|entries| entries.len())
            .unwrap_or(0))
    }
}

fn terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut word = String::new();
    let mut previous_wide: Option<char> = None;

    for c in text.chars() {
        if is_wide(c) && c.is_alphanumeric() {
            if !word.is_empty() {
                terms.push(std::mem::take(&mut word));
            }
            terms.push(c.to_string());
            if let Some(p) = previous_wide {
                terms.push(format!("{p}{c}"));
            }
            previous_wide = Some(c);
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
            previous_wide = None;
        } else {
            if !word.is_empty() {
                terms.push(std::mem::take(&mut word));
            }
            previous_wide = None;
        }
    }
    if !word.is_empty() {
        terms.push(word);
    }
    terms
}

fn fnv1a(term: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in term.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; EMBEDDING_DIM];
    for term in terms(text) {
        let idx = (fnv1a(&term) % EMBEDDING_DIM as u64) as usize;
        vec[idx] += 1.0;
    }

    // L2 normalize
    let mag: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if mag > 0.0 {
        for v in &mut vec {
            *v /= mag;
        }
    }
    vec
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = mag_a * mag_b;
    if denom == 0.0 { 0.0 } else { dot / denom }
}
