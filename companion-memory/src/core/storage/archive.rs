//! File archive mirror
//!
//! Whole-file JSON documents under a root directory:
//!
//! ```text
//! <root>/<owner>/<kind>.json
//! <root>/<owner>/conversations/with_<partner>/<memory_id>.json
//! <root>/answers/<answer_id>/answer.json
//! <root>/chatSessions/<session_id>/session.json
//! ```
//!
//! Writes create the parent directory, write a temporary sibling file and
//! rename it into place, so readers never observe a partial document.
//! Last writer wins.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::MemoryChunk;

const CONVERSATIONS_DIR: &str = "conversations";
const PARTNER_PREFIX: &str = "with_";

#[derive(Debug, Clone)]
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<owner>/<kind>.json`
    pub async fn save_document<T: Serialize>(
        &self,
        owner_id: &str,
        kind: &str,
        value: &T,
    ) -> Result<PathBuf> {
        let path = self.document_path(owner_id, kind)?;
        self.write_json(&path, value).await?;
        Ok(path)
    }

    pub async fn load_document<T: DeserializeOwned>(
        &self,
        owner_id: &str,
        kind: &str,
    ) -> Result<Option<T>> {
        let path = self.document_path(owner_id, kind)?;
        self.read_json(&path).await
    }

    /// `answers/<answer_id>/answer.json`
    pub async fn save_answer<T: Serialize>(&self, answer_id: &str, value: &T) -> Result<PathBuf> {
        let path = self.nested_path("answers", answer_id, "answer.json")?;
        self.write_json(&path, value).await?;
        Ok(path)
    }

    pub async fn load_answer<T: DeserializeOwned>(&self, answer_id: &str) -> Result<Option<T>> {
        let path = self.nested_path("answers", answer_id, "answer.json")?;
        self.read_json(&path).await
    }

    /// `chatSessions/<session_id>/session.json`
    pub async fn save_chat_session<T: Serialize>(
        &self,
        session_id: &str,
        value: &T,
    ) -> Result<PathBuf> {
        let path = self.nested_path("chatSessions", session_id, "session.json")?;
        self.write_json(&path, value).await?;
        Ok(path)
    }

    pub async fn load_chat_session<T: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> Result<Option<T>> {
        let path = self.nested_path("chatSessions", session_id, "session.json")?;
        self.read_json(&path).await
    }

    /// `<owner>/conversations/with_<partner>/<memory_id>.json`
    pub async fn save_memory(&self, memory: &MemoryChunk) -> Result<PathBuf> {
        validate_segment(&memory.owner_id)?;
        validate_segment(&memory.partner_id)?;
        validate_segment(&memory.memory_id)?;

        let path = self
            .root
            .join(&memory.owner_id)
            .join(CONVERSATIONS_DIR)
            .join(format!("{PARTNER_PREFIX}{}", memory.partner_id))
            .join(format!("{}.json", memory.memory_id));
        self.write_json(&path, memory).await?;
        Ok(path)
    }

    /// Every archived memory of `owner_id`. Unreadable files are skipped.
    pub async fn load_user_memories(&self, owner_id: &str) -> Result<Vec<MemoryChunk>> {
        validate_segment(owner_id)?;
        let conversations = self.root.join(owner_id).join(CONVERSATIONS_DIR);
        if !fs::try_exists(&conversations).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut memories = Vec::new();
        let mut partners = fs::read_dir(&conversations)
            .await
            .with_context(|| format!("reading {}", conversations.display()))?;

        while let Some(partner_dir) = partners.next_entry().await? {
            let name = partner_dir.file_name();
            if !name.to_string_lossy().starts_with(PARTNER_PREFIX)
                || !partner_dir.file_type().await?.is_dir()
            {
                continue;
            }

            let mut files = fs::read_dir(partner_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match self.read_json::<MemoryChunk>(&path).await {
                    Ok(Some(memory)) => memories.push(memory),
                    Ok(None) => {},
                    Err(e) => warn!("Skipping unreadable archive file {}: {}", path.display(), e),
                }
            }
        }

        memories.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));
        debug!("Loaded {} archived memories for {}", memories.len(), owner_id);
        Ok(memories)
    }

    fn document_path(&self, owner_id: &str, kind: &str) -> Result<PathBuf> {
        validate_segment(owner_id)?;
        validate_segment(kind)?;
        Ok(self.root.join(owner_id).join(format!("{kind}.json")))
    }

    fn nested_path(&self, dir: &str, id: &str, file: &str) -> Result<PathBuf> {
        validate_segment(id)?;
        Ok(self.root.join(dir).join(id).join(file))
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("{} has no parent directory", path.display()))?;
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;

        let body = serde_json::to_vec_pretty(value)?;
        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("renaming into {}", path.display()));
        }

        debug!("Archived {} ({} bytes)", path.display(), body.len());
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(value))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

/// Rejects ids that could escape their directory.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.starts_with('.') || segment.contains(['/', '\\', '\0']) {
        bail!("invalid path segment: {:?}", segment);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryContent, MemoryMeta};
    use chrono::{Duration, Utc};
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        turns: u32,
    }

    fn memory(id: &str, partner: &str, age_minutes: i64) -> MemoryChunk {
        MemoryChunk {
            memory_id: id.to_string(),
            owner_id: "alice".to_string(),
            partner_id: partner.to_string(),
            content: MemoryContent::default(),
            meta: MemoryMeta::default(),
            saved_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn test_document_round_trip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());

        let path = archive
            .save_document("alice", "sentiments", &Session { turns: 1 })
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("alice").join("sentiments.json"));

        archive
            .save_document("alice", "sentiments", &Session { turns: 2 })
            .await
            .unwrap();
        let loaded: Option<Session> = archive.load_document("alice", "sentiments").await.unwrap();
        assert_eq!(loaded, Some(Session { turns: 2 }));
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());
        let loaded: Option<Session> = archive.load_chat_session("s1").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_answer_and_session_paths() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());

        let answer = archive.save_answer("a1", &Session { turns: 3 }).await.unwrap();
        assert_eq!(answer, dir.path().join("answers/a1/answer.json"));

        let session = archive
            .save_chat_session("s1", &Session { turns: 4 })
            .await
            .unwrap();
        assert_eq!(session, dir.path().join("chatSessions/s1/session.json"));
        assert_eq!(
            archive.load_answer::<Session>("a1").await.unwrap(),
            Some(Session { turns: 3 })
        );
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());
        archive
            .save_document("alice", "profile", &Session { turns: 1 })
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("alice"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["profile.json".to_string()]);
    }

    #[tokio::test]
    async fn test_memories_round_trip_sorted() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());

        archive.save_memory(&memory("mem_new", "bob", 1)).await.unwrap();
        archive.save_memory(&memory("mem_old", "carol", 10)).await.unwrap();
        std::fs::write(
            dir.path().join("alice/conversations/with_bob/broken.json"),
            b"{not json",
        )
        .unwrap();

        let loaded = archive.load_user_memories("alice").await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|m| m.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["mem_old", "mem_new"]);

        assert!(archive.load_user_memories("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::new(dir.path());
        assert!(
            archive
                .save_document("../escape", "x", &Session { turns: 1 })
                .await
                .is_err()
        );
        assert!(archive.save_answer("", &Session { turns: 1 }).await.is_err());
    }
}
