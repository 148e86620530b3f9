//! Relationship favorability scoring
//!
//! Every interaction between an owner and a partner yields four factors
//! (sentiment, frequency, quality, decay). Their weighted sum moves the
//! pair's favorability score, which is clamped to `[0, 100]`.
//!
//! The sentiment factor comes from an LLM and falls back to `0` on any
//! failure; the engine never fails an update because the model did.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use companion_llm::{GenerateOptions, LlmClient};

use crate::core::storage::RelationshipStore;
use crate::models::{
    MemoryError, MemoryResult, Message, RelationshipRecord, Role, SentimentFactors,
    SentimentHistoryEntry,
};

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+(?:\.\d+)?").unwrap());

pub const SENTIMENT_RANGE: (f64, f64) = (-10.0, 10.0);
pub const QUALITY_MAX: f64 = 2.0;
pub const SCORE_RANGE: (f64, f64) = (0.0, 100.0);

/// Changes smaller than this are reported as "held".
const NEUTRAL_BAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentWeights {
    pub sentiment: f64,
    pub frequency: f64,
    pub quality: f64,
    pub decay: f64,
}

impl Default for SentimentWeights {
    fn default() -> Self {
        Self {
            sentiment: 0.6,
            frequency: 0.2,
            quality: 0.1,
            decay: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// Starting score of a new pair, clamped into [`SCORE_RANGE`].
    pub initial_score: f64,
    pub weights: SentimentWeights,
    pub analysis_temperature: f32,
    pub analysis_max_tokens: u32,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            initial_score: 50.0,
            weights: SentimentWeights::default(),
            analysis_temperature: 0.1,
            analysis_max_tokens: 10,
        }
    }
}

/// Input of one favorability update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
    /// Skips the LLM call when present.
    #[serde(default)]
    pub precomputed_sentiment: Option<f64>,
    #[serde(default)]
    pub is_conversation_end: bool,
    /// Overrides the stored familiarity flag when present.
    #[serde(default)]
    pub is_familiar: Option<bool>,
    #[serde(default)]
    pub relation_label: Option<String>,
}

impl UpdateRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.precomputed_sentiment = Some(sentiment);
        self
    }

    pub fn ending_conversation(mut self) -> Self {
        self.is_conversation_end = true;
        self
    }

    pub fn familiar(mut self, label: Option<String>) -> Self {
        self.is_familiar = Some(true);
        self.relation_label = label;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentUpdate {
    pub record: RelationshipRecord,
    pub factors: SentimentFactors,
    pub total_change: f64,
    /// Change after clamping; differs from `total_change` at the bounds.
    pub actual_change: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchUpdateResult {
    pub partner_id: String,
    pub outcome: Result<SentimentUpdate, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SentimentStats {
    pub total_partners: usize,
    pub average_score: f64,
    pub distribution: ScoreDistribution,
    pub last_update: Option<DateTime<Utc>>,
}

pub struct SentimentEngine {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn RelationshipStore>,
    config: SentimentConfig,
    pair_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl SentimentEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn RelationshipStore>,
        config: SentimentConfig,
    ) -> Self {
        Self {
            llm,
            store,
            config,
            pair_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SentimentConfig {
        &self.config
    }

    /// Weighted sum of the factors; absent factors contribute nothing.
    pub fn calculate_total_change(&self, factors: &SentimentFactors) -> f64 {
        let w = &self.config.weights;
        factors.sentiment.unwrap_or(0.0) * w.sentiment
            + factors.frequency.unwrap_or(0.0) * w.frequency
            + factors.quality.unwrap_or(0.0) * w.quality
            + factors.decay.unwrap_or(0.0) * w.decay
    }

    pub fn cap_score(&self, score: f64) -> f64 {
        let (min, max) = SCORE_RANGE;
        if score.is_nan() {
            return min;
        }
        score.clamp(min, max)
    }

    fn new_record(&self, owner_id: &str, partner_id: &str) -> RelationshipRecord {
        RelationshipRecord::new(owner_id, partner_id, self.cap_score(self.config.initial_score))
    }

    /// Ask the model for a score in `[-10, 10]`. Any failure yields `0`.
    pub async fn analyze_sentiment(&self, message: Option<&str>) -> f64 {
        let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) else {
            return 0.0;
        };

        let prompt = format!(
            "Rate the emotional tone of the following message with a single number \
             from -10 (very negative) to +10 (very positive), 0 being neutral.\n\n\
             Message: \"{message}\"\n\nReply with the number only:"
        );
        let options = GenerateOptions::new(
            self.config.analysis_temperature,
            self.config.analysis_max_tokens,
        );

        match self.llm.generate(&prompt, options).await {
            Ok(response) => parse_sentiment(&response).unwrap_or_else(|| {
                warn!("Sentiment analysis returned a non-numeric answer: {:?}", response);
                0.0
            }),
            Err(e) => {
                warn!("Sentiment analysis failed, using neutral: {}", e);
                0.0
            },
        }
    }

    /// Factors for one interaction against the pair's stored state.
    ///
    /// Nothing is written; a pair without a record is scored as new.
    pub async fn calculate_factors(
        &self,
        owner_id: &str,
        partner_id: &str,
        request: &UpdateRequest,
    ) -> MemoryResult<SentimentFactors> {
        let record = self
            .store
            .get(owner_id, partner_id)
            .await
            .map_err(MemoryError::storage)?
            .unwrap_or_else(|| self.new_record(owner_id, partner_id));
        Ok(self.factors_for(&record, request, Utc::now()).await)
    }

    async fn factors_for(
        &self,
        record: &RelationshipRecord,
        request: &UpdateRequest,
        now: DateTime<Utc>,
    ) -> SentimentFactors {
        let sentiment = match request.precomputed_sentiment {
            Some(value) if value.is_finite() => value.clamp(SENTIMENT_RANGE.0, SENTIMENT_RANGE.1),
            Some(_) => 0.0,
            None => self.analyze_sentiment(Some(&request.message)).await,
        };
        let is_familiar = request.is_familiar.unwrap_or(record.is_familiar);

        SentimentFactors {
            sentiment: Some(sentiment),
            frequency: frequency_factor(
                record.total_conversations,
                request.is_conversation_end,
                is_familiar,
            ),
            quality: Some(quality_factor(&request.history)),
            decay: decay_factor(record.last_interaction(), now),
        }
    }

    /// Human-readable attribution of a change
    pub fn generate_reason(&self, total_change: f64, factors: &SentimentFactors) -> String {
        let mut reasons = Vec::new();

        if let Some(sentiment) = factors.sentiment
            && sentiment.abs() > 0.1
        {
            reasons.push(if sentiment > 0.0 {
                "positive sentiment"
            } else {
                "negative sentiment"
            });
        }
        if factors.frequency.is_some_and(|f| f > 0.0) {
            reasons.push("more frequent conversations");
        }
        if factors.quality.is_some_and(|q| q > 0.0) {
            reasons.push("richer conversation");
        }
        if factors.decay.is_some_and(|d| d < 0.0) {
            reasons.push("time since last contact");
        }
        if reasons.is_empty() {
            reasons.push("no notable change");
        }

        let trend = if total_change >= NEUTRAL_BAND {
            "rose"
        } else if total_change <= -NEUTRAL_BAND {
            "fell"
        } else {
            "held"
        };

        format!(
            "Favorability {} ({:.1}): {}",
            trend,
            total_change.abs(),
            reasons.join(", ")
        )
    }

    /// Stored record for the pair, created at the initial score on first use.
    pub async fn get_or_create(
        &self,
        owner_id: &str,
        partner_id: &str,
    ) -> MemoryResult<RelationshipRecord> {
        if let Some(record) = self
            .store
            .get(owner_id, partner_id)
            .await
            .map_err(MemoryError::storage)?
        {
            return Ok(record);
        }

        let mut record = self.new_record(owner_id, partner_id);
        record.history.push(SentimentHistoryEntry {
            score: record.initial_score,
            change: 0.0,
            reason: "initial favorability".to_string(),
            factors: SentimentFactors::new(0.0, 0.0, 0.0, 0.0),
            timestamp: record.created_at,
        });
        self.store
            .upsert(&record)
            .await
            .map_err(MemoryError::storage)?;

        info!(
            "Created relationship {} -> {} at {}",
            owner_id, partner_id, record.initial_score
        );
        Ok(record)
    }

    /// Apply one interaction to the pair's score.
    ///
    /// Updates of the same pair are serialized; distinct pairs run freely.
    pub async fn update(
        &self,
        owner_id: &str,
        partner_id: &str,
        request: UpdateRequest,
    ) -> MemoryResult<SentimentUpdate> {
        let lock = self
            .pair_locks
            .entry((owner_id.to_string(), partner_id.to_string()))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut record = self.get_or_create(owner_id, partner_id).await?;
        let now = Utc::now();

        let factors = self.factors_for(&record, &request, now).await;
        let total_change = self.calculate_total_change(&factors);
        let previous = record.current_score;
        let new_score = self.cap_score(previous + total_change);
        let actual_change = new_score - previous;
        let reason = self.generate_reason(actual_change, &factors);

        record.current_score = new_score;
        record.updated_at = now;
        record.last_conversation_at = Some(now);
        record.total_messages += 1;
        if request.is_conversation_end {
            record.total_conversations += 1;
        }
        if let Some(familiar) = request.is_familiar {
            record.is_familiar = familiar;
        }
        if request.relation_label.is_some() {
            record.relation_label = request.relation_label.clone();
        }
        record.history.push(SentimentHistoryEntry {
            score: new_score,
            change: actual_change,
            reason: reason.clone(),
            factors,
            timestamp: now,
        });

        self.store
            .upsert(&record)
            .await
            .map_err(MemoryError::storage)?;

        debug!(
            "Favorability {} -> {}: {:.2} -> {:.2} ({:+.2})",
            owner_id, partner_id, previous, new_score, actual_change
        );

        Ok(SentimentUpdate {
            record,
            factors,
            total_change,
            actual_change,
            reason,
        })
    }

    /// Update several partners concurrently. One failure does not stop the rest.
    pub async fn batch_update(
        &self,
        owner_id: &str,
        updates: Vec<(String, UpdateRequest)>,
    ) -> Vec<BatchUpdateResult> {
        let futures = updates.into_iter().map(|(partner_id, request)| async move {
            let outcome = self
                .update(owner_id, &partner_id, request)
                .await
                .map_err(|e| {
                    warn!("Favorability update {} -> {} failed: {}", owner_id, partner_id, e);
                    e.to_string()
                });
            BatchUpdateResult {
                partner_id,
                outcome,
            }
        });
        join_all(futures).await
    }

    pub async fn stats(&self, owner_id: &str) -> MemoryResult<SentimentStats> {
        let records = self
            .store
            .list(owner_id)
            .await
            .map_err(MemoryError::storage)?;
        if records.is_empty() {
            return Ok(SentimentStats::default());
        }

        let total = records.len();
        let sum: f64 = records.iter().map(|r| r.current_score).sum();
        let mut distribution = ScoreDistribution::default();
        for record in &records {
            match record.current_score {
                s if s >= 70.0 => distribution.high += 1,
                s if s >= 30.0 => distribution.medium += 1,
                _ => distribution.low += 1,
            }
        }

        Ok(SentimentStats {
            total_partners: total,
            average_score: (sum / total as f64 * 100.0).round() / 100.0,
            distribution,
            last_update: records.iter().map(|r| r.updated_at).max(),
        })
    }
}

fn parse_sentiment(response: &str) -> Option<f64> {
    let value: f64 = LEADING_NUMBER.find(response.trim())?.as_str().parse().ok()?;
    Some(value.clamp(SENTIMENT_RANGE.0, SENTIMENT_RANGE.1))
}

/// Bonus for finishing a conversation, shrinking as conversations accumulate.
/// Familiar partners never drop below 0.5. Mid-conversation updates carry none.
pub fn frequency_factor(
    total_conversations: u64,
    is_conversation_end: bool,
    is_familiar: bool,
) -> Option<f64> {
    if !is_conversation_end {
        return None;
    }
    let bonus = match total_conversations {
        0 => 1.0,
        1..=4 => 0.5,
        5..=9 => 0.3,
        _ => 0.2,
    };
    Some(if is_familiar { f64::max(bonus, 0.5) } else { bonus })
}

/// Rewards longer exchanges and substantial replies on both sides.
pub fn quality_factor(history: &[Message]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let rounds = history.len() / 2;
    let mut quality = 0.0;
    if rounds >= 1 {
        quality += 0.2;
    }
    if rounds >= 3 {
        quality += 0.3;
    }
    if rounds >= 5 {
        quality += 0.5;
    }

    if let [.., user, assistant] = history
        && history.len() >= 4
        && user.role == Role::User
        && assistant.role == Role::Assistant
        && user.content.chars().count() > 20
        && assistant.content.chars().count() > 50
    {
        quality += 0.3;
    }

    f64::min(quality, QUALITY_MAX)
}

/// Penalty growing with the silence since the last interaction.
/// Less than a day, or no interaction yet, carries none.
pub fn decay_factor(last_interaction: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<f64> {
    let elapsed = now - last_interaction?;
    let decay = if elapsed >= Duration::days(30) {
        -10.0
    } else if elapsed >= Duration::days(14) {
        -5.0
    } else if elapsed >= Duration::days(7) {
        -2.0
    } else if elapsed >= Duration::days(3) {
        -1.0
    } else if elapsed >= Duration::days(1) {
        -0.5
    } else {
        return None;
    };
    Some(decay)
}
