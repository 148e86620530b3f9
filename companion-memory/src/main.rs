use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use companion_llm::{LlmClient, OpenAiCompatibleClient};
use companion_memory::core::config::{Settings, StorageBackend, VectorBackendKind};
use companion_memory::core::storage::{
    FileArchive, InMemoryMemoryRecordStore, InMemoryVectorBackend, MeilisearchVectorBackend,
    MemoryRecordStore, Neo4jClient, Neo4jMemoryRecordStore, VectorBackend,
};
use companion_memory::{
    BatchCompressionPipeline, LlmDigestCompressor, MemoryStore, ProgressEvent, VectorIndexService,
};

#[derive(Debug, Parser)]
#[command(
    name = "companion-memory",
    about = "Operator tools for companion conversation memory"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Compress the user's questionnaire answers into digests
    Compress {
        /// User whose questionnaire tree is compressed
        user_id: String,
    },

    /// Rebuild the owner's similarity index from stored memories
    RebuildIndex {
        owner_id: String,
    },

    /// Restore the owner's memories from the file archive
    Recover {
        owner_id: String,
    },
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let settings = Settings::new()?;
    init_tracing(settings.logging.json);

    match cli.command {
        Command::Compress { user_id } => compress(&settings, &user_id).await,
        Command::RebuildIndex { owner_id } => rebuild_index(&settings, &owner_id).await,
        Command::Recover { owner_id } => recover(&settings, &owner_id).await,
    }
}

async fn memory_store(settings: &Settings) -> Result<MemoryStore> {
    let records: Arc<dyn MemoryRecordStore> = match settings.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryMemoryRecordStore::new()),
        StorageBackend::Neo4j => {
            let client = Neo4jClient::new(settings.neo4j_config()).await?;
            Arc::new(Neo4jMemoryRecordStore::new(client))
        },
    };
    let archive = FileArchive::new(settings.storage.archive_dir.clone());
    info!("Archive mirror at {}", archive.root().display());
    Ok(MemoryStore::new(records, Some(archive)))
}

fn vector_backend(settings: &Settings) -> Result<Arc<dyn VectorBackend>> {
    Ok(match settings.vector.backend {
        VectorBackendKind::Memory => Arc::new(InMemoryVectorBackend::new()),
        VectorBackendKind::Meilisearch => {
            Arc::new(MeilisearchVectorBackend::new(settings.meilisearch_config())?)
        },
    })
}

async fn compress(settings: &Settings, user_id: &str) -> Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::new(settings.llm_config())?);
    let config = settings.compression_config();
    let compressor = LlmDigestCompressor::from_config(llm, &config);
    let pipeline = Arc::new(BatchCompressionPipeline::new(Arc::new(compressor), config));

    let mut events = pipeline.spawn(user_id);
    let mut failed = false;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let ProgressEvent::Error { error, .. } = &event {
            warn!("Compression job for {} failed: {}", user_id, error);
            failed = true;
        }
    }

    if failed {
        bail!("compression job for {} failed", user_id);
    }
    Ok(())
}

async fn rebuild_index(settings: &Settings, owner_id: &str) -> Result<()> {
    let store = memory_store(settings).await?;
    if settings.storage.backend == StorageBackend::Memory {
        let restored = store.recover_from_archive(owner_id).await?;
        info!("Loaded {} archived memories for {}", restored, owner_id);
    }

    let index = VectorIndexService::new(vector_backend(settings)?, settings.vector_config());
    if !index.initialize().await {
        bail!("vector backend is not available");
    }

    let memories = store.load_user_memories(owner_id).await?;
    let report = index
        .rebuild_index_with_progress(owner_id, &memories, |progress| {
            info!("Indexed {}/{}", progress.processed, progress.total);
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn recover(settings: &Settings, owner_id: &str) -> Result<()> {
    let store = memory_store(settings).await?;
    let restored = store.recover_from_archive(owner_id).await?;
    println!("{}", serde_json::json!({ "owner_id": owner_id, "restored": restored }));
    Ok(())
}
