use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::core::chunking::ChunkingConfig;
use crate::core::compression::CompressionConfig;
use crate::core::retry::RetryConfig;
use crate::core::sentiment::{SentimentConfig, SentimentWeights};
use crate::core::storage::{MeilisearchConfig, Neo4jConfig};
use crate::core::vector::VectorConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub storage: StorageConfig,
    #[serde(default)]
    pub neo4j: Neo4jSettings,
    pub vector: VectorSettings,
    pub llm: LlmSettings,
    pub chunking: ChunkingSettings,
    pub sentiment: SentimentSettings,
    pub compression: CompressionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Neo4j,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Memory,
    Meilisearch,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub archive_dir: PathBuf,
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorSettings {
    pub backend: VectorBackendKind,
    pub url: String,
    pub api_key: Option<String>,
    pub collection_prefix: String,
    pub rebuild_batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingSettings {
    pub max_messages: usize,
    pub max_token_budget: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SentimentSettings {
    pub initial_score: f64,
    pub sentiment_weight: f64,
    pub frequency_weight: f64,
    pub quality_weight: f64,
    pub decay_weight: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompressionSettings {
    pub questionnaire_dir: PathBuf,
    pub concurrent_limit: usize,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub progress_update_threshold: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Questions expected per role A layer; defaults to the highest order found.
    #[serde(default)]
    pub expected_role_a_total: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::builder()?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("COMPANION_MEMORY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only, without files or environment.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("storage.archive_dir", "storage/userdata")?
            .set_default("storage.backend", "memory")?
            .set_default("neo4j.uri", "bolt://localhost:7687")?
            .set_default("neo4j.user", "neo4j")?
            .set_default("neo4j.password", "password")?
            .set_default("neo4j.max_connections", 10)?
            .set_default("vector.backend", "memory")?
            .set_default("vector.url", "http://localhost:7700")?
            .set_default("vector.collection_prefix", "companion_memories")?
            .set_default("vector.rebuild_batch_size", 50)?
            .set_default("llm.base_url", "http://localhost:11434")?
            .set_default("llm.model", "qwen2.5:7b")?
            .set_default("llm.timeout_seconds", 60)?
            .set_default("chunking.max_messages", 20)?
            .set_default("chunking.max_token_budget", 2000)?
            .set_default("sentiment.initial_score", 50.0)?
            .set_default("sentiment.sentiment_weight", 0.6)?
            .set_default("sentiment.frequency_weight", 0.2)?
            .set_default("sentiment.quality_weight", 0.1)?
            .set_default("sentiment.decay_weight", 0.1)?
            .set_default("compression.questionnaire_dir", "storage/userdata")?
            .set_default("compression.concurrent_limit", 5)?
            .set_default("compression.retry_count", 2)?
            .set_default("compression.retry_delay_ms", 1000)?
            .set_default("compression.progress_update_threshold", 5)?
            .set_default("compression.temperature", 0.7)?
            .set_default("compression.max_tokens", 200)?
            .set_default("logging.json", false)
    }

    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_messages: self.chunking.max_messages,
            max_token_budget: self.chunking.max_token_budget,
        }
    }

    pub fn sentiment_config(&self) -> SentimentConfig {
        SentimentConfig {
            initial_score: self.sentiment.initial_score,
            weights: SentimentWeights {
                sentiment: self.sentiment.sentiment_weight,
                frequency: self.sentiment.frequency_weight,
                quality: self.sentiment.quality_weight,
                decay: self.sentiment.decay_weight,
            },
            ..SentimentConfig::default()
        }
    }

    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            root_dir: self.compression.questionnaire_dir.clone(),
            concurrent_limit: self.compression.concurrent_limit,
            retry: RetryConfig::fixed(
                self.compression.retry_count,
                self.compression.retry_delay_ms,
            ),
            progress_update_threshold: self.compression.progress_update_threshold,
            temperature: self.compression.temperature,
            max_tokens: self.compression.max_tokens,
            expected_role_a_total: self.compression.expected_role_a_total,
        }
    }

    pub fn vector_config(&self) -> VectorConfig {
        VectorConfig {
            collection_prefix: self.vector.collection_prefix.clone(),
            rebuild_batch_size: self.vector.rebuild_batch_size,
        }
    }

    pub fn neo4j_config(&self) -> Neo4jConfig {
        Neo4jConfig {
            uri: self.neo4j.uri.clone(),
            user: self.neo4j.user.clone(),
            password: self.neo4j.password.clone(),
            max_connections: self.neo4j.max_connections,
        }
    }

    pub fn meilisearch_config(&self) -> MeilisearchConfig {
        MeilisearchConfig {
            url: self.vector.url.clone(),
            api_key: self.vector.api_key.clone(),
        }
    }

    pub fn llm_config(&self) -> companion_llm::HttpClientConfig {
        companion_llm::HttpClientConfig {
            base_url: self.llm.base_url.clone(),
            model: self.llm.model.clone(),
            api_key: self.llm.api_key.clone(),
            timeout_seconds: self.llm.timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::defaults().unwrap();
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.vector.backend, VectorBackendKind::Memory);
        assert_eq!(settings.chunking.max_messages, 20);
        assert_eq!(settings.chunking.max_token_budget, 2000);
        assert_eq!(settings.compression.concurrent_limit, 5);
        assert_eq!(settings.compression.retry_count, 2);
        assert!(!settings.logging.json);
    }

    #[test]
    fn test_component_configs() {
        let settings = Settings::defaults().unwrap();

        let sentiment = settings.sentiment_config();
        assert_eq!(sentiment.initial_score, 50.0);
        assert_eq!(sentiment.weights.sentiment, 0.6);

        let compression = settings.compression_config();
        assert_eq!(compression.retry.max_retries, 2);
        assert_eq!(compression.retry.initial_delay_ms, 1000);
        assert!(compression.expected_role_a_total.is_none());

        assert_eq!(settings.vector_config().rebuild_batch_size, 50);
    }
}
