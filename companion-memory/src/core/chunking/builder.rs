//! Greedy chunk materialization
//!
//! A chunk closes before the next message is appended when that message
//! starts a topic boundary, would exceed `max_messages`, or would push the
//! running token count past `max_token_budget`. A message is never split, so
//! a single oversized message becomes a chunk of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use super::tokens::TokenEstimator;
use super::topics::{TopicCategory, dominant_topic};
use crate::models::{Message, message::transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_messages: usize,
    pub max_token_budget: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_token_budget: 2000,
        }
    }
}

/// A contiguous slice of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationChunk {
    pub chunk_id: String,
    pub chunk_index: usize,
    /// Index of the first message, inclusive.
    pub start_index: usize,
    /// Index of the last message, inclusive.
    pub end_index: usize,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub topic: Option<TopicCategory>,
    pub possibly_incomplete: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationChunk {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn contains(&self, message_index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&message_index)
    }

    pub fn transcript(&self) -> String {
        transcript(&self.messages)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkBuilder {
    config: ChunkingConfig,
    estimator: TokenEstimator,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            estimator: TokenEstimator::default(),
        }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Partition `messages` into chunks, honouring `boundaries` and the budget.
    pub fn build(&self, messages: &[Message], boundaries: &[usize]) -> Vec<ConversationChunk> {
        let cuts: HashSet<usize> = boundaries.iter().copied().collect();
        let max_messages = self.config.max_messages.max(1);

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut tokens = 0;

        for (index, message) in messages.iter().enumerate() {
            let cost = self.estimator.estimate_message(message);
            let len = index - start;

            let close = len > 0
                && (cuts.contains(&index)
                    || len >= max_messages
                    || tokens + cost > self.config.max_token_budget);

            if close {
                chunks.push(self.materialize(chunks.len(), start, &messages[start..index], tokens));
                start = index;
                tokens = 0;
            }
            tokens += cost;
        }

        if start < messages.len() {
            chunks.push(self.materialize(chunks.len(), start, &messages[start..], tokens));
        }

        debug!(
            "Built {} chunks from {} messages ({} boundaries)",
            chunks.len(),
            messages.len(),
            boundaries.len()
        );
        chunks
    }

    fn materialize(
        &self,
        chunk_index: usize,
        start_index: usize,
        slice: &[Message],
        token_count: usize,
    ) -> ConversationChunk {
        let end_index = start_index + slice.len() - 1;
        ConversationChunk {
            chunk_id: chunk_id(start_index, end_index, slice),
            chunk_index,
            start_index,
            end_index,
            messages: slice.to_vec(),
            token_count,
            topic: dominant_topic(slice),
            possibly_incomplete: false,
            created_at: Utc::now(),
        }
    }
}

fn chunk_id(start: usize, end: usize, messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(start.to_le_bytes());
    hasher.update(end.to_le_bytes());
    for message in messages {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update(message.content.as_bytes());
        hasher.update(message.timestamp.timestamp_millis().to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("chunk_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunking::TopicBoundaryDetector;

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("message {i}"))
                } else {
                    Message::assistant(format!("reply {i}"))
                }
            })
            .collect()
    }

    fn assert_partition(messages: &[Message], chunks: &[ConversationChunk]) {
        let mut expected = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.start_index, expected);
            assert_eq!(chunk.messages.len(), chunk.end_index - chunk.start_index + 1);
            assert_eq!(
                chunk.messages.as_slice(),
                &messages[chunk.start_index..=chunk.end_index]
            );
            expected = chunk.end_index + 1;
        }
        assert_eq!(expected, messages.len());
    }

    #[test]
    fn test_empty_conversation_has_no_chunks() {
        let chunks = ChunkBuilder::default().build(&[], &[0]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_message_limit_splits() {
        let messages = conversation(45);
        let builder = ChunkBuilder::new(ChunkingConfig {
            max_messages: 20,
            max_token_budget: 10_000,
        });
        let chunks = builder.build(&messages, &[0]);

        assert_eq!(
            chunks.iter().map(|c| c.message_count()).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );
        assert_partition(&messages, &chunks);
    }

    #[test]
    fn test_token_budget_splits() {
        // "message N"/"reply N" cost 2-3 tokens each
        let messages = conversation(10);
        let builder = ChunkBuilder::new(ChunkingConfig {
            max_messages: 20,
            max_token_budget: 6,
        });
        let chunks = builder.build(&messages, &[0]);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 6);
        }
        assert_partition(&messages, &chunks);
    }

    #[test]
    fn test_oversized_message_is_its_own_chunk() {
        let huge = "很".repeat(2000);
        let messages = vec![
            Message::user("hello"),
            Message::assistant(huge.clone()),
            Message::user("bye"),
        ];
        let chunks = ChunkBuilder::default().build(&messages, &[0]);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].messages[0].content, huge);
        assert_eq!(chunks[1].token_count, 3000);
        assert_partition(&messages, &chunks);
    }

    #[test]
    fn test_topic_boundaries_close_chunks() {
        let messages = vec![
            Message::user("今天天气真好"),
            Message::assistant("是啊"),
            Message::user("我最近身体不舒服"),
            Message::assistant("要注意休息"),
        ];
        let boundaries = TopicBoundaryDetector::new().detect(&messages);
        let chunks = ChunkBuilder::default().build(&messages, &boundaries);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].topic, Some(TopicCategory::Weather));
        assert_eq!(chunks[1].topic, Some(TopicCategory::Health));
        assert_partition(&messages, &chunks);
    }

    #[test]
    fn test_zero_message_limit_still_progresses() {
        let messages = conversation(3);
        let builder = ChunkBuilder::new(ChunkingConfig {
            max_messages: 0,
            max_token_budget: 2000,
        });
        let chunks = builder.build(&messages, &[0]);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_chunk_ids_are_stable_and_distinct() {
        let messages = conversation(4);
        let builder = ChunkBuilder::new(ChunkingConfig {
            max_messages: 2,
            max_token_budget: 2000,
        });
        let first = builder.build(&messages, &[0]);
        let second = builder.build(&messages, &[0]);

        assert_eq!(first[0].chunk_id, second[0].chunk_id);
        assert_ne!(first[0].chunk_id, first[1].chunk_id);
        assert!(first[0].chunk_id.starts_with("chunk_"));
    }
}
