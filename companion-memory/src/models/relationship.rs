//! Per-pair relationship state persisted by the relationship store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-interaction factor snapshot. Missing factors count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentFactors {
    pub sentiment: Option<f64>,
    pub frequency: Option<f64>,
    pub quality: Option<f64>,
    pub decay: Option<f64>,
}

impl SentimentFactors {
    pub fn new(sentiment: f64, frequency: f64, quality: f64, decay: f64) -> Self {
        Self {
            sentiment: Some(sentiment),
            frequency: Some(frequency),
            quality: Some(quality),
            decay: Some(decay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentHistoryEntry {
    pub score: f64,
    pub change: f64,
    pub reason: String,
    pub factors: SentimentFactors,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub owner_id: String,
    pub partner_id: String,
    pub current_score: f64,
    pub initial_score: f64,
    #[serde(default)]
    pub history: Vec<SentimentHistoryEntry>,
    #[serde(default)]
    pub total_conversations: u64,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub last_conversation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_familiar: bool,
    #[serde(default)]
    pub relation_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RelationshipRecord {
    pub fn new(
        owner_id: impl Into<String>,
        partner_id: impl Into<String>,
        initial_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.into(),
            partner_id: partner_id.into(),
            current_score: initial_score,
            initial_score,
            history: Vec::new(),
            total_conversations: 0,
            total_messages: 0,
            last_conversation_at: None,
            is_familiar: false,
            relation_label: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Most recent interaction time, from the history or the last conversation.
    pub fn last_interaction(&self) -> Option<DateTime<Utc>> {
        let from_history = self.history.last().map(|h| h.timestamp);
        match (from_history, self.last_conversation_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}
