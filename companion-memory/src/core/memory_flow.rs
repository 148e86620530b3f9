//! Transcript in, stored and indexed memories out
//!
//! Segments a conversation, summarizes every chunk, saves each one through
//! [`MemoryStore`] and hands it to the vector index on a spawned task. The
//! save path never waits for indexing.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::chunking::{
    ChunkBuilder, ConversationChunk, IncompleteTopicDetector, TopicBoundaryDetector,
};
use crate::core::memory_store::MemoryStore;
use crate::core::summarizer::ChunkSummarizer;
use crate::core::vector::{IndexOutcome, VectorIndexService};
use crate::models::{
    CompressionStage, MemoryContent, MemoryMeta, MemoryResult, Message, NewMemory, SavedMemory,
};

#[derive(Debug)]
pub struct ConversationSaveReport {
    pub boundaries: Vec<usize>,
    /// One per chunk, in chunk order.
    pub memories: Vec<SavedMemory>,
    /// Chunk indices flagged as possibly incomplete.
    pub incomplete_chunks: Vec<usize>,
    /// Chunk indices with incomplete chunks first.
    pub recompaction_order: Vec<usize>,
    pub index_tasks: Vec<JoinHandle<IndexOutcome>>,
}

impl ConversationSaveReport {
    fn empty() -> Self {
        Self {
            boundaries: Vec::new(),
            memories: Vec::new(),
            incomplete_chunks: Vec::new(),
            recompaction_order: Vec::new(),
            index_tasks: Vec::new(),
        }
    }

    /// Wait for every index task; tasks that died count as failures.
    pub async fn wait_for_index(&mut self) -> Vec<IndexOutcome> {
        let mut outcomes = Vec::with_capacity(self.index_tasks.len());
        for task in self.index_tasks.drain(..) {
            outcomes.push(task.await.unwrap_or_else(|e| IndexOutcome {
                success: false,
                error: Some(e.to_string()),
            }));
        }
        outcomes
    }
}

pub struct ConversationMemoryWriter {
    boundaries: TopicBoundaryDetector,
    builder: ChunkBuilder,
    incomplete: IncompleteTopicDetector,
    summarizer: Arc<dyn ChunkSummarizer>,
    store: MemoryStore,
    index: Arc<VectorIndexService>,
}

impl ConversationMemoryWriter {
    pub fn new(
        builder: ChunkBuilder,
        summarizer: Arc<dyn ChunkSummarizer>,
        store: MemoryStore,
        index: Arc<VectorIndexService>,
    ) -> Self {
        Self {
            boundaries: TopicBoundaryDetector::new(),
            builder,
            incomplete: IncompleteTopicDetector::default(),
            summarizer,
            store,
            index,
        }
    }

    pub fn with_incomplete_detector(mut self, detector: IncompleteTopicDetector) -> Self {
        self.incomplete = detector;
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Chunks of `messages`, flagged for possibly incomplete topics.
    pub fn segment(&self, messages: &[Message]) -> (Vec<usize>, Vec<ConversationChunk>) {
        let boundaries = self.boundaries.detect(messages);
        let mut chunks = self.builder.build(messages, &boundaries);
        self.incomplete.mark_chunks(messages, &mut chunks);
        (boundaries, chunks)
    }

    /// Save every chunk of the conversation for `owner_id`.
    ///
    /// Chunks are saved in order; a storage failure stops at that chunk and
    /// leaves the earlier ones saved.
    pub async fn save_conversation(
        &self,
        owner_id: &str,
        partner_id: &str,
        messages: &[Message],
    ) -> MemoryResult<ConversationSaveReport> {
        if messages.is_empty() {
            return Ok(ConversationSaveReport::empty());
        }

        let (boundaries, chunks) = self.segment(messages);
        let mut report = ConversationSaveReport {
            incomplete_chunks: chunks
                .iter()
                .filter(|c| c.possibly_incomplete)
                .map(|c| c.chunk_index)
                .collect(),
            recompaction_order: self.incomplete.recompaction_order(&chunks),
            boundaries,
            ..ConversationSaveReport::empty()
        };

        for chunk in &chunks {
            let processed = self.summarizer.summarize(chunk).await;
            let stage = if processed.summary.is_empty() {
                CompressionStage::Raw
            } else {
                CompressionStage::Summarized
            };
            let memory = NewMemory {
                content: MemoryContent {
                    raw: chunk.transcript(),
                    processed,
                },
                meta: MemoryMeta {
                    message_count: chunk.message_count(),
                    chunk_index: chunk.chunk_index,
                    compression_stage: stage,
                    topic: chunk.topic.map(|t| t.as_str().to_string()),
                    possibly_incomplete: chunk.possibly_incomplete,
                    token_count: chunk.token_count,
                    derived_from: None,
                },
            };

            let saved = self.store.save_memory(owner_id, partner_id, memory).await?;
            debug!(
                "Saved chunk {} of {} -> {} as {}",
                chunk.chunk_index, owner_id, partner_id, saved.memory_id
            );

            let index = self.index.clone();
            let owner = owner_id.to_string();
            let memory_id = saved.memory_id.clone();
            let content = saved.memory.content.clone();
            report.index_tasks.push(tokio::spawn(async move {
                index.index_memory(&owner, &memory_id, &content).await
            }));
            report.memories.push(saved);
        }

        info!(
            "Saved {} memories for {} -> {} ({} possibly incomplete)",
            report.memories.len(),
            owner_id,
            partner_id,
            report.incomplete_chunks.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunking::ChunkingConfig;
    use crate::core::storage::InMemoryVectorBackend;
    use crate::core::summarizer::KeywordSummarizer;
    use crate::core::vector::VectorConfig;

    fn writer(max_messages: usize) -> ConversationMemoryWriter {
        ConversationMemoryWriter::new(
            ChunkBuilder::new(ChunkingConfig {
                max_messages,
                max_token_budget: 2000,
            }),
            Arc::new(KeywordSummarizer::new()),
            MemoryStore::in_memory(),
            Arc::new(VectorIndexService::new(
                Arc::new(InMemoryVectorBackend::new()),
                VectorConfig::default(),
            )),
        )
    }

    #[tokio::test]
    async fn test_empty_conversation_saves_nothing() {
        let report = writer(20)
            .save_conversation("alice", "bob", &[])
            .await
            .unwrap();
        assert!(report.memories.is_empty());
        assert!(report.index_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_saves_one_memory_per_chunk() {
        let writer = writer(2);
        let messages = vec![
            Message::user("今天天气怎么样"),
            Message::assistant("今天晴天，很暖和"),
            Message::user("我最近身体不太好，要去医院"),
            Message::assistant("哪里不舒服？"),
            Message::user("腿疼"),
        ];

        let mut report = writer
            .save_conversation("alice", "bob", &messages)
            .await
            .unwrap();
        assert_eq!(report.boundaries, vec![0, 2]);
        assert_eq!(report.memories.len(), 3);

        let total: usize = report
            .memories
            .iter()
            .map(|m| m.memory.meta.message_count)
            .sum();
        assert_eq!(total, messages.len());
        assert_eq!(
            report.memories[0].memory.meta.topic.as_deref(),
            Some("weather")
        );

        let outcomes = report.wait_for_index().await;
        assert!(outcomes.iter().all(|o| o.success));

        let stored = writer.store().load_pair_memories("alice", "bob").await.unwrap();
        assert_eq!(stored.len(), 3);
    }
}
