//! Heuristic detection of unresolved exchanges
//!
//! An assistant message answered by a user message is "possibly incomplete"
//! when it is very short or reads like a question. The result only orders
//! re-compaction work; it never gates saving.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::builder::ConversationChunk;
use crate::models::Message;

static QUESTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([?？]\s*$|吗[?？]|呢[?？]|什么|怎么|为什么|谁|哪里|哪儿|多少|\b(what|why|how|who|where|when)\b)")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    TooShort,
    Question,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteTopic {
    pub message_index: usize,
    pub content: String,
    pub reason: IncompleteReason,
}

#[derive(Debug, Clone, Copy)]
pub struct IncompleteTopicDetector {
    min_length: usize,
}

impl Default for IncompleteTopicDetector {
    fn default() -> Self {
        Self { min_length: 10 }
    }
}

impl IncompleteTopicDetector {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn classify(&self, content: &str) -> Option<IncompleteReason> {
        let trimmed = content.trim();
        if trimmed.chars().count() < self.min_length {
            Some(IncompleteReason::TooShort)
        } else if QUESTION_PATTERN.is_match(trimmed) {
            Some(IncompleteReason::Question)
        } else {
            None
        }
    }

    /// Assistant messages directly followed by a user message that look unresolved.
    pub fn detect(&self, messages: &[Message]) -> Vec<IncompleteTopic> {
        messages
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0].is_assistant() && pair[1].is_user())
            .filter_map(|(index, pair)| {
                self.classify(&pair[0].content).map(|reason| IncompleteTopic {
                    message_index: index,
                    content: pair[0].content.clone(),
                    reason,
                })
            })
            .collect()
    }

    /// Set `possibly_incomplete` on chunks whose trailing exchange was flagged.
    ///
    /// `messages` is the full conversation the chunks were built from.
    pub fn mark_chunks(&self, messages: &[Message], chunks: &mut [ConversationChunk]) {
        let flagged = self.detect(messages);
        for chunk in chunks.iter_mut() {
            let last_assistant = (chunk.start_index..=chunk.end_index)
                .rev()
                .find(|&i| messages.get(i).is_some_and(Message::is_assistant));

            chunk.possibly_incomplete = last_assistant
                .is_some_and(|i| flagged.iter().any(|t| t.message_index == i));
        }
    }

    /// Chunk indices with possibly-incomplete chunks first, original order otherwise.
    pub fn recompaction_order(&self, chunks: &[ConversationChunk]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        order.sort_by_key(|&i| !chunks[i].possibly_incomplete);
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunking::{ChunkBuilder, ChunkingConfig};

    #[test]
    fn test_short_reply_is_flagged() {
        let detector = IncompleteTopicDetector::default();
        assert_eq!(detector.classify("好的"), Some(IncompleteReason::TooShort));
        assert_eq!(detector.classify("   ok   "), Some(IncompleteReason::TooShort));
    }

    #[test]
    fn test_question_patterns() {
        let detector = IncompleteTopicDetector::default();
        assert_eq!(
            detector.classify("您今天有没有按时吃药呢？"),
            Some(IncompleteReason::Question)
        );
        assert_eq!(
            detector.classify("What did the doctor tell you today"),
            Some(IncompleteReason::Question)
        );
        assert_eq!(
            detector.classify("Is the garden doing well this spring?"),
            Some(IncompleteReason::Question)
        );
        assert_eq!(detector.classify("听起来您今天过得很充实，真为您高兴。"), None);
    }

    #[test]
    fn test_only_assistant_then_user_pairs() {
        let detector = IncompleteTopicDetector::default();
        let messages = vec![
            Message::user("嗯"),
            Message::assistant("好的"),
            Message::user("我去做饭了"),
            Message::assistant("嗯"),
        ];
        let flagged = detector.detect(&messages);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].message_index, 1);
        assert_eq!(flagged[0].reason, IncompleteReason::TooShort);
    }

    #[test]
    fn test_mark_chunks_and_order() {
        let detector = IncompleteTopicDetector::default();
        let messages = vec![
            Message::user("今天出去散步了，空气很好"),
            Message::assistant("散步对身体很好，您平时都去哪里散步呢？"),
            Message::user("就在小区附近"),
            Message::assistant("小区附近走走也很舒服，注意安全就好。"),
            Message::user("知道了"),
            Message::assistant("您真是一个很会照顾自己的人。"),
        ];
        let mut chunks = ChunkBuilder::new(ChunkingConfig {
            max_messages: 2,
            max_token_budget: 2000,
        })
        .build(&messages, &[0]);

        detector.mark_chunks(&messages, &mut chunks);
        assert!(chunks[0].possibly_incomplete);
        assert!(!chunks[1].possibly_incomplete);
        assert!(!chunks[2].possibly_incomplete);

        assert_eq!(detector.recompaction_order(&chunks), vec![0, 1, 2]);
        chunks[0].possibly_incomplete = false;
        chunks[2].possibly_incomplete = true;
        assert_eq!(detector.recompaction_order(&chunks), vec![2, 0, 1]);
    }
}
