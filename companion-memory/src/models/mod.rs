pub mod error;
pub mod memory;
pub mod message;
pub mod relationship;

pub use error::{MemoryError, MemoryResult};
pub use memory::{
    CompressionStage, MemoryChunk, MemoryContent, MemoryMeta, NewMemory, ProcessedContent,
    SavedMemory,
};
pub use message::{Message, Role};
pub use relationship::{RelationshipRecord, SentimentFactors, SentimentHistoryEntry};
