//! Conversational memory and relationship sentiment for companion chats
//!
//! Conversations are cut into topical chunks, summarized, stored durably
//! with a file archive mirror and indexed for similarity search. A separate
//! engine keeps a favorability score per (owner, partner) pair, and a batch
//! pipeline compresses questionnaire answers into short digests.
//!
//! ```rust,ignore
//! let store = MemoryStore::in_memory();
//! let index = Arc::new(VectorIndexService::new(backend, VectorConfig::default()));
//! let writer = ConversationMemoryWriter::new(
//!     ChunkBuilder::default(),
//!     Arc::new(KeywordSummarizer::new()),
//!     store,
//!     index.clone(),
//! );
//!
//! writer.save_conversation("owner_1", "partner_1", &messages).await?;
//! let hits = index.search_similar("owner_1", "knee pain", 5).await;
//! ```

pub mod core;
pub mod models;

pub use crate::core::chunking::{
    ChunkBuilder, ChunkingConfig, ConversationChunk, IncompleteTopicDetector, TokenEstimator,
    TopicBoundaryDetector,
};
pub use crate::core::compression::{
    BatchCompressionPipeline, CompressionConfig, DigestCompressor, LlmDigestCompressor,
    ProgressEvent,
};
pub use crate::core::config::Settings;
pub use crate::core::memory_flow::{ConversationMemoryWriter, ConversationSaveReport};
pub use crate::core::memory_store::MemoryStore;
pub use crate::core::progress::ProgressTracker;
pub use crate::core::sentiment::{SentimentConfig, SentimentEngine, UpdateRequest};
pub use crate::core::summarizer::{ChunkSummarizer, KeywordSummarizer, LlmChunkSummarizer};
pub use crate::core::vector::{VectorConfig, VectorIndexService};
pub use crate::models::{MemoryError, MemoryResult};
