//! Durable write-through memory store
//!
//! Each saved memory is written to the primary record store and then
//! mirrored into the file archive. The primary write decides success; a
//! failed mirror write is only logged. Reads are served from the primary
//! store, and `recover_from_archive` refills it after a loss.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::storage::{FileArchive, InMemoryMemoryRecordStore, MemoryRecordStore};
use crate::models::{
    CompressionStage, MemoryChunk, MemoryError, MemoryResult, NewMemory, ProcessedContent,
    SavedMemory,
};

#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<dyn MemoryRecordStore>,
    archive: Option<FileArchive>,
}

impl MemoryStore {
    pub fn new(records: Arc<dyn MemoryRecordStore>, archive: Option<FileArchive>) -> Self {
        Self { records, archive }
    }

    /// In-memory primary store without an archive.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMemoryRecordStore::new()), None)
    }

    pub fn archive(&self) -> Option<&FileArchive> {
        self.archive.as_ref()
    }

    /// Assign a fresh id and timestamp, then write through.
    ///
    /// Fails only when the primary write fails; nothing is mirrored in that case.
    pub async fn save_memory(
        &self,
        owner_id: &str,
        partner_id: &str,
        chunk: NewMemory,
    ) -> MemoryResult<SavedMemory> {
        validate_id(owner_id)?;
        validate_id(partner_id)?;

        let memory = MemoryChunk {
            memory_id: format!("mem_{}", Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            partner_id: partner_id.to_string(),
            content: chunk.content,
            meta: chunk.meta,
            saved_at: Utc::now(),
        };

        self.write_through(&memory).await?;

        info!(
            "Saved memory {} ({} -> {}, stage {})",
            memory.memory_id,
            owner_id,
            partner_id,
            memory.meta.compression_stage.as_str()
        );
        Ok(SavedMemory {
            memory_id: memory.memory_id.clone(),
            memory,
        })
    }

    /// Save the same chunk for both participants, each under its own id.
    pub async fn save_bidirectional(
        &self,
        first_id: &str,
        second_id: &str,
        chunk: NewMemory,
    ) -> MemoryResult<(SavedMemory, SavedMemory)> {
        tokio::try_join!(
            self.save_memory(first_id, second_id, chunk.clone()),
            self.save_memory(second_id, first_id, chunk),
        )
    }

    /// Store a further-processed version of `previous` as a new record.
    ///
    /// `previous` is left untouched.
    pub async fn save_compression_stage(
        &self,
        previous: &MemoryChunk,
        stage: CompressionStage,
        processed: ProcessedContent,
    ) -> MemoryResult<SavedMemory> {
        let mut next = NewMemory {
            content: previous.content.clone(),
            meta: previous.meta.clone(),
        };
        next.content.processed = processed;
        next.meta.compression_stage = stage;
        next.meta.derived_from = Some(previous.memory_id.clone());

        self.save_memory(&previous.owner_id, &previous.partner_id, next)
            .await
    }

    pub async fn get(&self, memory_id: &str) -> MemoryResult<Option<MemoryChunk>> {
        self.records
            .get(memory_id)
            .await
            .map_err(MemoryError::storage)
    }

    /// All memories of `owner_id`, grouped by partner, oldest first.
    pub async fn load_user_memories(
        &self,
        owner_id: &str,
    ) -> MemoryResult<BTreeMap<String, Vec<MemoryChunk>>> {
        validate_id(owner_id)?;
        let mut memories = self
            .records
            .find_by_owner(owner_id)
            .await
            .map_err(MemoryError::storage)?;
        memories.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));

        let mut grouped: BTreeMap<String, Vec<MemoryChunk>> = BTreeMap::new();
        for memory in memories {
            grouped
                .entry(memory.partner_id.clone())
                .or_default()
                .push(memory);
        }

        debug!(
            "Loaded memories for {}: {} partners",
            owner_id,
            grouped.len()
        );
        Ok(grouped)
    }

    pub async fn load_pair_memories(
        &self,
        owner_id: &str,
        partner_id: &str,
    ) -> MemoryResult<Vec<MemoryChunk>> {
        let mut memories = self
            .records
            .find_by_pair(owner_id, partner_id)
            .await
            .map_err(MemoryError::storage)?;
        memories.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));
        Ok(memories)
    }

    /// Re-insert archived memories that are missing from the primary store.
    ///
    /// Returns how many records were restored.
    pub async fn recover_from_archive(&self, owner_id: &str) -> MemoryResult<usize> {
        validate_id(owner_id)?;
        let Some(ref archive) = self.archive else {
            return Err(MemoryError::Archive("no archive configured".into()));
        };

        let archived = archive
            .load_user_memories(owner_id)
            .await
            .map_err(MemoryError::archive)?;

        let mut restored = 0;
        for memory in archived {
            let exists = self
                .records
                .get(&memory.memory_id)
                .await
                .map_err(MemoryError::storage)?
                .is_some();
            if exists {
                continue;
            }
            self.records
                .insert(&memory)
                .await
                .map_err(MemoryError::storage)?;
            restored += 1;
        }

        info!("Recovered {} memories for {} from archive", restored, owner_id);
        Ok(restored)
    }

    async fn write_through(&self, memory: &MemoryChunk) -> MemoryResult<()> {
        if let Err(e) = self.records.insert(memory).await {
            error!(
                "Primary store rejected memory {} for {}: {}",
                memory.memory_id, memory.owner_id, e
            );
            return Err(MemoryError::storage(e));
        }

        if let Some(ref archive) = self.archive
            && let Err(e) = archive.save_memory(memory).await
        {
            warn!(
                "Failed to mirror memory {} to archive: {}",
                memory.memory_id, e
            );
        }
        Ok(())
    }
}

fn validate_id(id: &str) -> MemoryResult<()> {
    if id.trim().is_empty() || id.starts_with('.') || id.contains(['/', '\\', '\0']) {
        return Err(MemoryError::InvalidOwnerId(id.to_string()));
    }
    Ok(())
}
