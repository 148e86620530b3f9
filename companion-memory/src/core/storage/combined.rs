//! Primary store + file archive mirror for relationship records
//!
//! Every upsert goes to the primary store first. On success the owner's
//! full relationship list is mirrored to `<owner>/sentiments.json`; a
//! failed mirror write is logged and never fails the upsert. Mirror writes
//! for one owner are serialized, so the last snapshot written is never older
//! than the last completed upsert.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::RelationshipRecord;

use super::archive::FileArchive;
use super::traits::RelationshipStore;

pub const SENTIMENTS_DOCUMENT: &str = "sentiments";

/// Relationship store that mirrors each owner's records into the archive
pub struct ArchivedRelationshipStore {
    primary: Arc<dyn RelationshipStore>,
    archive: FileArchive,
    mirror_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ArchivedRelationshipStore {
    pub fn new(primary: Arc<dyn RelationshipStore>, archive: FileArchive) -> Self {
        Self {
            primary,
            archive,
            mirror_locks: DashMap::new(),
        }
    }

    /// Archived snapshot of an owner's relationships, keyed by partner
    pub async fn load_archived(
        &self,
        owner_id: &str,
    ) -> Result<Option<BTreeMap<String, RelationshipRecord>>> {
        self.archive
            .load_document(owner_id, SENTIMENTS_DOCUMENT)
            .await
    }

    async fn mirror(&self, owner_id: &str) {
        let lock = self
            .mirror_locks
            .entry(owner_id.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let records = match self.primary.list(owner_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list relationships of {} for archive: {}", owner_id, e);
                return;
            },
        };

        let snapshot: BTreeMap<String, RelationshipRecord> = records
            .into_iter()
            .map(|r| (r.partner_id.clone(), r))
            .collect();

        match self
            .archive
            .save_document(owner_id, SENTIMENTS_DOCUMENT, &snapshot)
            .await
        {
            Ok(path) => debug!("Mirrored {} relationships to {}", snapshot.len(), path.display()),
            Err(e) => warn!("Failed to mirror relationships of {}: {}", owner_id, e),
        }
    }
}

#[async_trait]
impl RelationshipStore for ArchivedRelationshipStore {
    async fn get(&self, owner_id: &str, partner_id: &str) -> Result<Option<RelationshipRecord>> {
        self.primary.get(owner_id, partner_id).await
    }

    async fn upsert(&self, record: &RelationshipRecord) -> Result<()> {
        self.primary.upsert(record).await?;
        self.mirror(&record.owner_id).await;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<RelationshipRecord>> {
        self.primary.list(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::InMemoryRelationshipStore;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Takes its snapshot immediately, then answers later; earlier calls wait longest.
    struct SlowListStore {
        inner: InMemoryRelationshipStore,
        calls: AtomicU64,
    }

    #[async_trait]
    impl RelationshipStore for SlowListStore {
        async fn get(&self, owner_id: &str, partner_id: &str) -> Result<Option<RelationshipRecord>> {
            self.inner.get(owner_id, partner_id).await
        }

        async fn upsert(&self, record: &RelationshipRecord) -> Result<()> {
            self.inner.upsert(record).await
        }

        async fn list(&self, owner_id: &str) -> Result<Vec<RelationshipRecord>> {
            let snapshot = self.inner.list(owner_id).await?;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(call * 4))).await;
            Ok(snapshot)
        }
    }

    #[tokio::test]
    async fn test_upsert_mirrors_owner_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ArchivedRelationshipStore::new(
            Arc::new(InMemoryRelationshipStore::new()),
            FileArchive::new(dir.path()),
        );

        store
            .upsert(&RelationshipRecord::new("alice", "bob", 50.0))
            .await
            .unwrap();
        store
            .upsert(&RelationshipRecord::new("alice", "carol", 40.0))
            .await
            .unwrap();

        assert!(dir.path().join("alice/sentiments.json").exists());
        let snapshot = store.load_archived("alice").await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["carol"].current_score, 40.0);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_leave_complete_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ArchivedRelationshipStore::new(
            Arc::new(SlowListStore {
                inner: InMemoryRelationshipStore::new(),
                calls: AtomicU64::new(0),
            }),
            FileArchive::new(dir.path()),
        );

        let partners: Vec<String> = (0..10).map(|i| format!("partner_{i}")).collect();
        let results = join_all(partners.iter().map(|partner| {
            let record = RelationshipRecord::new("alice", partner.as_str(), 50.0);
            let store = &store;
            async move { store.upsert(&record).await }
        }))
        .await;
        assert!(results.iter().all(|r| r.is_ok()));

        let snapshot = store.load_archived("alice").await.unwrap().unwrap();
        assert_eq!(snapshot.len(), partners.len());
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_fail_upsert() {
        let dir = TempDir::new().unwrap();
        // A file where the archive root should be makes every mirror write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let store = ArchivedRelationshipStore::new(
            Arc::new(InMemoryRelationshipStore::new()),
            FileArchive::new(&blocked),
        );
        store
            .upsert(&RelationshipRecord::new("alice", "bob", 50.0))
            .await
            .unwrap();
        assert!(store.get("alice", "bob").await.unwrap().is_some());
    }
}
