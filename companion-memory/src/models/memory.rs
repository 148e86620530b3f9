//! Stored memory records
//!
//! A [`MemoryChunk`] is written once and never mutated in place. Further
//! processing produces a new record at a later [`CompressionStage`] that
//! points back at its source through `meta.derived_from`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStage {
    #[default]
    Raw,
    Summarized,
    Digest,
}

impl CompressionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Summarized => "summarized",
            Self::Digest => "digest",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    pub raw: String,
    #[serde(default)]
    pub processed: ProcessedContent,
}

impl MemoryContent {
    /// Text used for similarity indexing: the summary when present, else the raw text.
    pub fn index_text(&self) -> &str {
        if self.processed.summary.trim().is_empty() {
            &self.raw
        } else {
            &self.processed.summary
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMeta {
    pub message_count: usize,
    pub chunk_index: usize,
    #[serde(default)]
    pub compression_stage: CompressionStage,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub possibly_incomplete: bool,
    #[serde(default)]
    pub token_count: usize,
    /// Memory id of the record this one was compressed from.
    #[serde(default)]
    pub derived_from: Option<String>,
}

/// Caller-supplied part of a memory, before ids and timestamps are assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: MemoryContent,
    pub meta: MemoryMeta,
}

impl NewMemory {
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            content: MemoryContent {
                raw: text.into(),
                processed: ProcessedContent::default(),
            },
            meta: MemoryMeta::default(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.content.processed.summary = summary.into();
        self
    }

    pub fn with_chunk_index(mut self, chunk_index: usize) -> Self {
        self.meta.chunk_index = chunk_index;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub memory_id: String,
    pub owner_id: String,
    pub partner_id: String,
    pub content: MemoryContent,
    pub meta: MemoryMeta,
    pub saved_at: DateTime<Utc>,
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMemory {
    pub memory_id: String,
    pub memory: MemoryChunk,
}
