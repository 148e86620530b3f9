//! Chunk summaries stored alongside the raw transcript
//!
//! Summarizing never fails a save: the LLM summarizer falls back to the
//! keyword summarizer whenever the model errors or answers with something
//! that is not the expected JSON.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use companion_llm::{GenerateOptions, LlmClient};

use crate::core::chunking::{ConversationChunk, TopicCategory};
use crate::models::{ProcessedContent, Role};

const SUMMARY_PREVIEW_CHARS: usize = 60;
const FACT_MIN_CHARS: usize = 10;
const FACT_MAX_CHARS: usize = 100;
const MAX_FACTS: usize = 3;

#[async_trait]
pub trait ChunkSummarizer: Send + Sync {
    async fn summarize(&self, chunk: &ConversationChunk) -> ProcessedContent;
}

/// Summary built from topic keywords and the user's own statements
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSummarizer;

impl KeywordSummarizer {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize_chunk(&self, chunk: &ConversationChunk) -> ProcessedContent {
        let user_lines: Vec<&str> = chunk
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .collect();

        let key_topics: Vec<String> = TopicCategory::ALL
            .into_iter()
            .filter(|category| {
                user_lines
                    .iter()
                    .any(|line| crate::core::chunking::classify(line) == Some(*category))
            })
            .map(|category| category.as_str().to_string())
            .collect();

        let preview = user_lines
            .first()
            .map(|line| truncate_chars(line, SUMMARY_PREVIEW_CHARS))
            .unwrap_or_default();
        let summary = match (key_topics.is_empty(), preview.is_empty()) {
            (_, true) => String::new(),
            (true, false) => preview,
            (false, false) => format!("{}: {}", key_topics.join(", "), preview),
        };

        let facts = user_lines
            .iter()
            .filter(|line| line.chars().count() >= FACT_MIN_CHARS)
            .filter(|line| !line.ends_with('?') && !line.ends_with('？'))
            .take(MAX_FACTS)
            .map(|line| truncate_chars(line, FACT_MAX_CHARS))
            .collect();

        ProcessedContent {
            summary,
            key_topics,
            facts,
        }
    }
}

#[async_trait]
impl ChunkSummarizer for KeywordSummarizer {
    async fn summarize(&self, chunk: &ConversationChunk) -> ProcessedContent {
        self.summarize_chunk(chunk)
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(default, alias = "keyTopics")]
    key_topics: Vec<String>,
    #[serde(default)]
    facts: Vec<String>,
}

pub struct LlmChunkSummarizer {
    llm: Arc<dyn LlmClient>,
    options: GenerateOptions,
    fallback: KeywordSummarizer,
}

impl LlmChunkSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            options: GenerateOptions::new(0.3, 300),
            fallback: KeywordSummarizer,
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    fn prompt(chunk: &ConversationChunk) -> String {
        format!(
            "Summarize the following conversation excerpt for long-term memory.\n\
             Reply with JSON only, in the form \
             {{\"summary\": string, \"key_topics\": [string], \"facts\": [string]}}.\n\
             Facts are things the user said about themselves.\n\n{}",
            chunk.transcript()
        )
    }
}

#[async_trait]
impl ChunkSummarizer for LlmChunkSummarizer {
    async fn summarize(&self, chunk: &ConversationChunk) -> ProcessedContent {
        let response = match self.llm.generate(&Self::prompt(chunk), self.options).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Summarizing {} failed, using keywords: {}", chunk.chunk_id, e);
                return self.fallback.summarize_chunk(chunk);
            },
        };

        match parse_summary(&response) {
            Some(processed) => {
                debug!("Summarized {} with the model", chunk.chunk_id);
                processed
            },
            None => {
                warn!(
                    "Unusable summary for {}, using keywords: {:?}",
                    chunk.chunk_id, response
                );
                self.fallback.summarize_chunk(chunk)
            },
        }
    }
}

/// The outermost JSON object in `response`, if it holds a non-empty summary.
fn parse_summary(response: &str) -> Option<ProcessedContent> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: SummaryResponse = serde_json::from_str(&response[start..=end]).ok()?;
    let summary = parsed.summary.trim();
    if summary.is_empty() {
        return None;
    }
    Some(ProcessedContent {
        summary: summary.to_string(),
        key_topics: parsed.key_topics,
        facts: parsed.facts,
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
