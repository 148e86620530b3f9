//! End-to-end memory flow: transcript to durable store, archive and index.

use companion_memory::core::storage::{
    FileArchive, InMemoryMemoryRecordStore, InMemoryVectorBackend, MemoryRecordStore,
};
use companion_memory::models::{CompressionStage, Message, ProcessedContent};
use companion_memory::{
    ChunkBuilder, ChunkingConfig, ConversationMemoryWriter, KeywordSummarizer, MemoryStore,
    VectorConfig, VectorIndexService,
};
use std::sync::Arc;
use tempfile::TempDir;

fn conversation() -> Vec<Message> {
    vec![
        Message::user("今天天气真冷，外面一直在下雨"),
        Message::assistant("是啊，出门记得多穿点衣服"),
        Message::user("我的膝盖又疼了，明天要去医院看医生"),
        Message::assistant("哪里疼？"),
        Message::user("左边膝盖，走路的时候特别明显"),
    ]
}

fn writer(store: MemoryStore, index: Arc<VectorIndexService>) -> ConversationMemoryWriter {
    ConversationMemoryWriter::new(
        ChunkBuilder::new(ChunkingConfig::default()),
        Arc::new(KeywordSummarizer::new()),
        store,
        index,
    )
}

#[tokio::test]
async fn test_conversation_is_stored_archived_and_searchable() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new(
        Arc::new(InMemoryMemoryRecordStore::new()),
        Some(FileArchive::new(dir.path())),
    );
    let index = Arc::new(VectorIndexService::new(
        Arc::new(InMemoryVectorBackend::new()),
        VectorConfig::default(),
    ));
    let writer = writer(store.clone(), index.clone());

    let mut report = writer
        .save_conversation("grandma_li", "volunteer_wang", &conversation())
        .await
        .unwrap();

    assert_eq!(report.boundaries, vec![0, 2]);
    assert_eq!(report.memories.len(), 2);
    assert_eq!(report.incomplete_chunks, vec![1]);
    assert_eq!(report.recompaction_order, vec![1, 0]);
    assert!(report.wait_for_index().await.iter().all(|o| o.success));

    let health = &report.memories[1].memory;
    assert_eq!(health.meta.topic.as_deref(), Some("health"));
    assert_eq!(health.meta.compression_stage, CompressionStage::Summarized);
    assert!(health.meta.possibly_incomplete);

    let archived = dir
        .path()
        .join("grandma_li/conversations/with_volunteer_wang")
        .join(format!("{}.json", health.memory_id));
    assert!(archived.exists());

    let hits = index.search_similar("grandma_li", "膝盖疼", 5).await;
    assert!(!hits.is_empty());
    assert_eq!(hits[0].memory_id, health.memory_id);
    assert!(index.search_similar("volunteer_wang", "膝盖疼", 5).await.is_empty());
}

#[tokio::test]
async fn test_memories_group_by_partner() {
    let store = MemoryStore::in_memory();
    let index = Arc::new(VectorIndexService::new(
        Arc::new(InMemoryVectorBackend::new()),
        VectorConfig::default(),
    ));
    let writer = writer(store.clone(), index);

    writer
        .save_conversation("grandma_li", "volunteer_wang", &conversation())
        .await
        .unwrap();
    writer
        .save_conversation("grandma_li", "daughter_mei", &conversation()[..2])
        .await
        .unwrap();

    let grouped = store.load_user_memories("grandma_li").await.unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped["volunteer_wang"].len(), 2);
    assert_eq!(grouped["daughter_mei"].len(), 1);
}

#[tokio::test]
async fn test_lost_primary_store_is_rebuilt_from_archive() {
    let dir = TempDir::new().unwrap();
    let archive = FileArchive::new(dir.path());
    let original = MemoryStore::new(
        Arc::new(InMemoryMemoryRecordStore::new()),
        Some(archive.clone()),
    );
    let index = Arc::new(VectorIndexService::new(
        Arc::new(InMemoryVectorBackend::new()),
        VectorConfig::default(),
    ));
    let mut report = writer(original.clone(), index)
        .save_conversation("grandma_li", "volunteer_wang", &conversation())
        .await
        .unwrap();
    report.wait_for_index().await;

    let summarized = original
        .save_compression_stage(
            &report.memories[0].memory,
            CompressionStage::Digest,
            ProcessedContent {
                summary: "Cold and rainy day".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        summarized.memory.meta.derived_from.as_deref(),
        Some(report.memories[0].memory_id.as_str())
    );

    // A fresh primary store over the same archive starts empty.
    let records = Arc::new(InMemoryMemoryRecordStore::new());
    let restored = MemoryStore::new(records.clone(), Some(archive));
    assert!(records.find_by_owner("grandma_li").await.unwrap().is_empty());

    assert_eq!(restored.recover_from_archive("grandma_li").await.unwrap(), 3);
    assert_eq!(restored.recover_from_archive("grandma_li").await.unwrap(), 0);

    let memories = restored.load_user_memories("grandma_li").await.unwrap();
    assert_eq!(memories["volunteer_wang"].len(), 3);

    let fresh_index = VectorIndexService::new(
        Arc::new(InMemoryVectorBackend::new()),
        VectorConfig::default(),
    );
    let rebuilt = fresh_index
        .rebuild_index("grandma_li", &memories)
        .await
        .unwrap();
    assert_eq!(rebuilt.indexed, 3);
    assert!(!fresh_index.search_similar("grandma_li", "rainy", 3).await.is_empty());
}
