//! Neo4j storage implementations
//!
//! This module provides Neo4j-backed implementations of the storage traits.
//! Labels are prefixed with "Companion" to avoid conflicts with other applications.
//!
//! ## Schema
//!
//! ```cypher
//! (:CompanionMemory {
//!     memory_id: String,
//!     owner_id: String,
//!     partner_id: String,
//!     compression_stage: String,
//!     saved_at: String,        // RFC 3339, UTC, microseconds: sorts lexically
//!     payload: String          // full MemoryChunk as JSON
//! })
//!
//! (:CompanionRelationship {
//!     owner_id: String,
//!     partner_id: String,
//!     current_score: Float,
//!     updated_at: String,
//!     payload: String          // full RelationshipRecord as JSON
//! })
//!
//! CREATE CONSTRAINT companion_memory_id IF NOT EXISTS FOR (m:CompanionMemory) REQUIRE m.memory_id IS UNIQUE;
//! CREATE INDEX companion_memory_owner IF NOT EXISTS FOR (m:CompanionMemory) ON (m.owner_id);
//! CREATE INDEX companion_relationship_pair IF NOT EXISTS FOR (r:CompanionRelationship) ON (r.owner_id, r.partner_id);
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;
use neo4rs::{Graph, Query, query};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{MemoryChunk, RelationshipRecord};

use super::traits::{MemoryRecordStore, RelationshipStore};

/// Configuration for Neo4j connection
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "password".to_string()),
            max_connections: 10,
        }
    }
}

/// Neo4j client wrapper
#[derive(Clone)]
pub struct Neo4jClient {
    graph: Arc<Graph>,
}

impl Neo4jClient {
    /// Create a new Neo4j client
    pub async fn new(config: Neo4jConfig) -> Result<Self> {
        info!("Connecting to Neo4j at {}", config.uri);

        let neo_config = neo4rs::ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections)
            .build()?;
        let graph = Graph::connect(neo_config).await?;

        let client = Self {
            graph: Arc::new(graph),
        };

        client.init_schema().await?;

        info!("Connected to Neo4j successfully");
        Ok(client)
    }

    /// Initialize Neo4j schema with constraints and indexes
    async fn init_schema(&self) -> Result<()> {
        let statements = vec![
            "CREATE CONSTRAINT companion_memory_id IF NOT EXISTS FOR (m:CompanionMemory) REQUIRE m.memory_id IS UNIQUE",
            "CREATE INDEX companion_memory_owner IF NOT EXISTS FOR (m:CompanionMemory) ON (m.owner_id)",
            "CREATE INDEX companion_relationship_pair IF NOT EXISTS FOR (r:CompanionRelationship) ON (r.owner_id, r.partner_id)",
        ];

        for statement in statements {
            if let Err(e) = self.graph.run(query(statement)).await {
                debug!("Schema statement result: {:?}", e);
            }
        }

        info!("Neo4j schema initialized for companion memory");
        Ok(())
    }

    /// Get the underlying graph for direct queries
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run `q` and decode the JSON `payload` column of every row
    async fn fetch_payloads<T: DeserializeOwned>(&self, q: Query) -> Result<Vec<T>> {
        let mut result = self.graph.execute(q).await?;
        let mut items = Vec::new();
        while let Some(row) = result.next().await? {
            let payload: String = row.get("payload")?;
            items.push(serde_json::from_str(&payload)?);
        }
        Ok(items)
    }
}

// ============================================================================
// Neo4jMemoryRecordStore
// ============================================================================

/// Neo4j-backed implementation of MemoryRecordStore
pub struct Neo4jMemoryRecordStore {
    client: Neo4jClient,
}

impl Neo4jMemoryRecordStore {
    pub fn new(client: Neo4jClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MemoryRecordStore for Neo4jMemoryRecordStore {
    async fn insert(&self, memory: &MemoryChunk) -> Result<()> {
        let payload = serde_json::to_string(memory)?;
        let saved_at = memory
            .saved_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let q = query(
            "CREATE (m:CompanionMemory {
                memory_id: $memory_id,
                owner_id: $owner_id,
                partner_id: $partner_id,
                compression_stage: $stage,
                saved_at: $saved_at,
                payload: $payload
            })",
        )
        .param("memory_id", memory.memory_id.clone())
        .param("owner_id", memory.owner_id.clone())
        .param("partner_id", memory.partner_id.clone())
        .param("stage", memory.meta.compression_stage.as_str())
        .param("saved_at", saved_at)
        .param("payload", payload);

        self.client.graph.run(q).await?;

        debug!("Created Neo4j memory: {}", memory.memory_id);
        Ok(())
    }

    async fn get(&self, memory_id: &str) -> Result<Option<MemoryChunk>> {
        let q = query(
            "MATCH (m:CompanionMemory {memory_id: $memory_id})
            RETURN m.payload as payload",
        )
        .param("memory_id", memory_id);

        Ok(self.client.fetch_payloads(q).await?.into_iter().next())
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<MemoryChunk>> {
        let q = query(
            "MATCH (m:CompanionMemory {owner_id: $owner_id})
            RETURN m.payload as payload
            ORDER BY m.saved_at",
        )
        .param("owner_id", owner_id);

        self.client.fetch_payloads(q).await
    }

    async fn find_by_pair(&self, owner_id: &str, partner_id: &str) -> Result<Vec<MemoryChunk>> {
        let q = query(
            "MATCH (m:CompanionMemory {owner_id: $owner_id, partner_id: $partner_id})
            RETURN m.payload as payload
            ORDER BY m.saved_at",
        )
        .param("owner_id", owner_id)
        .param("partner_id", partner_id);

        self.client.fetch_payloads(q).await
    }
}

// ============================================================================
// Neo4jRelationshipStore
// ============================================================================

/// Neo4j-backed implementation of RelationshipStore
pub struct Neo4jRelationshipStore {
    client: Neo4jClient,
}

impl Neo4jRelationshipStore {
    pub fn new(client: Neo4jClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RelationshipStore for Neo4jRelationshipStore {
    async fn get(&self, owner_id: &str, partner_id: &str) -> Result<Option<RelationshipRecord>> {
        let q = query(
            "MATCH (r:CompanionRelationship {owner_id: $owner_id, partner_id: $partner_id})
            RETURN r.payload as payload",
        )
        .param("owner_id", owner_id)
        .param("partner_id", partner_id);

        Ok(self.client.fetch_payloads(q).await?.into_iter().next())
    }

    async fn upsert(&self, record: &RelationshipRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let updated_at = record
            .updated_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let q = query(
            "MERGE (r:CompanionRelationship {owner_id: $owner_id, partner_id: $partner_id})
            SET r.current_score = $score,
                r.updated_at = $updated_at,
                r.payload = $payload",
        )
        .param("owner_id", record.owner_id.clone())
        .param("partner_id", record.partner_id.clone())
        .param("score", record.current_score)
        .param("updated_at", updated_at)
        .param("payload", payload);

        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<RelationshipRecord>> {
        let q = query(
            "MATCH (r:CompanionRelationship {owner_id: $owner_id})
            RETURN r.payload as payload
            ORDER BY r.partner_id",
        )
        .param("owner_id", owner_id);

        self.client.fetch_payloads(q).await
    }
}
