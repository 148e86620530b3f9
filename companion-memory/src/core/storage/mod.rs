//! Storage abstractions for companion memory
//!
//! This module defines traits for the primary record store, the
//! relationship store and similarity collections, plus the file archive
//! mirror.
//!
//! ## Available Backends
//!
//! - `memory`: In-memory storage using DashMap/RwLock (default)
//! - `neo4j`: Neo4j graph database storage
//! - `meilisearch`: Meilisearch similarity collections
//! - `archive`: JSON file mirror on the local filesystem

pub mod archive;
pub mod combined;
pub mod meilisearch;
mod memory;
pub mod neo4j;
mod traits;

pub use archive::FileArchive;
pub use combined::ArchivedRelationshipStore;
pub use meilisearch::{MeilisearchConfig, MeilisearchVectorBackend};
pub use memory::*;
pub use neo4j::{Neo4jClient, Neo4jConfig, Neo4jMemoryRecordStore, Neo4jRelationshipStore};
pub use traits::*;
