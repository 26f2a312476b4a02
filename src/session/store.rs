//! Session snapshots on disk.
//!
//! Each session is saved to `{sessions_dir}/{session_id}.json`, wrapped in a
//! versioned envelope. Loading re-validates every invariant and resets the
//! cursor to the last turn.

use super::model::{DialogueSession, SessionRecord};
use crate::{ColloquyError, Result};
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned envelope written for each session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub session: DialogueSession,
}

/// Listing entry for a saved session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Only the fields a listing needs
#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
    session: SessionHeader,
}

#[derive(Deserialize)]
struct SessionHeader {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    turns: Vec<IgnoredAny>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Snapshot body before the session's invariants are checked
#[derive(Deserialize)]
struct StoredSnapshot {
    session: SessionRecord,
}

/// Manages session snapshot files
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    /// Open a store rooted at `sessions_dir`, creating it if needed
    pub async fn new(sessions_dir: &Path) -> Result<Self> {
        fs::create_dir_all(sessions_dir).await?;
        Ok(Self {
            sessions_dir: sessions_dir.to_path_buf(),
        })
    }

    /// Write the session's full state; returns the file written
    pub async fn save(&self, session: &DialogueSession) -> Result<PathBuf> {
        let snapshot = SessionSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            session: session.clone(),
        };

        let path = self.session_path(&session.id);
        let content = serde_json::to_string_pretty(&snapshot)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved session {} ({} turns)", session.id, session.len());
        Ok(path)
    }

    /// Load a saved session. Returns None if nothing is saved under that id.
    pub async fn load(&self, session_id: &str) -> Result<Option<DialogueSession>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let probe: VersionProbe = serde_json::from_str(&content)?;
        if probe.version != SNAPSHOT_VERSION {
            return Err(ColloquyError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: probe.version,
            });
        }

        let stored: StoredSnapshot = serde_json::from_str(&content)?;
        let session = DialogueSession::try_from(stored.session)?;
        info!(
            "Loaded session {} ({} turns, {} checkpoints)",
            session_id,
            session.len(),
            session.checkpoints().len()
        );
        Ok(Some(session))
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.session_path(session_id).exists()
    }

    /// List saved sessions, most recently updated first.
    /// Unreadable files are skipped.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<SnapshotHeader>(&content) {
                Ok(header) if header.version == SNAPSHOT_VERSION => sessions.push(SessionSummary {
                    id: header.session.id,
                    name: header.session.name,
                    created_at: header.session.created_at,
                    updated_at: header.session.updated_at,
                    turn_count: header.session.turns.len(),
                }),
                Ok(header) => {
                    warn!("Skipping {} (snapshot version {})", path.display(), header.version)
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }

    /// Clean up old sessions (keep the most recent N)
    pub async fn cleanup(&self, keep: usize) -> Result<usize> {
        let mut entries: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        let mut dir = fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Ok(meta) = entry.metadata().await {
                if let Ok(modified) = meta.modified() {
                    entries.push((entry.path(), modified));
                }
            }
        }

        entries.sort_by_key(|(_, t)| *t);

        let to_remove = entries.len().saturating_sub(keep);
        for (path, _) in entries.iter().take(to_remove) {
            let _ = fs::remove_file(path).await;
        }
        if to_remove > 0 {
            info!("Cleaned up {} old session files", to_remove);
        }
        Ok(to_remove)
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        let safe_id: String = session_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.sessions_dir.join(format!("{}.json", safe_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SummaryCheckpoint;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_session(id: &str, turns: usize) -> DialogueSession {
        let mut session = DialogueSession::new("A snowed-in cabin")
            .with_id(id)
            .with_character("Rook", "A trapper");
        for i in 0..turns {
            session.append("char1", format!("line {i}"), None).unwrap();
        }
        session
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();

        let mut session = sample_session("conv_test", 5);
        session.navigate(crate::Direction::Back);
        store.save(&session).await.unwrap();

        let loaded = store.load("conv_test").await.unwrap().unwrap();
        assert_eq!(loaded.cursor(), Some(4));
        session.navigate(crate::Direction::Forward);
        assert_eq!(loaded, session);
    }

    fn checkpoint(range_start: usize, range_end: usize, text: &str) -> SummaryCheckpoint {
        SummaryCheckpoint {
            range_start,
            range_end,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Save a session, then overwrite its checkpoint list on disk
    async fn save_with_checkpoints(store: &SessionStore, dir: &Path, id: &str, turns: usize, ranges: &[(usize, usize)]) {
        store.save(&sample_session(id, turns)).await.unwrap();
        let path = dir.join(format!("{id}.json"));
        let mut json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        json["session"]["checkpoints"] = serde_json::to_value(
            ranges
                .iter()
                .map(|&(start, end)| checkpoint(start, end, "summary"))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_checkpoints_survive_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();

        let mut session = sample_session("conv_cp", 9);
        session.push_checkpoint(checkpoint(0, 4, "Rook set the snares.")).unwrap();
        session.push_checkpoint(checkpoint(4, 8, "The storm cut the road.")).unwrap();
        store.save(&session).await.unwrap();

        let loaded = store.load("conv_cp").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoints(), session.checkpoints());
        assert_eq!(loaded.covered_end(), 8);
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_load_rejects_checkpoint_gap() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        save_with_checkpoints(&store, tmp.path(), "gap", 8, &[(0, 4), (5, 8)]).await;

        let result = store.load("gap").await;
        assert!(matches!(result, Err(ColloquyError::StateInvariant(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_checkpoint_past_log() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        save_with_checkpoints(&store, tmp.path(), "long", 3, &[(0, 50)]).await;

        let result = store.load("long").await;
        assert!(matches!(result, Err(ColloquyError::StateInvariant(_))));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(!store.has_session("nope"));
    }

    #[tokio::test]
    async fn test_load_rejects_other_version() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        std::fs::write(
            tmp.path().join("old.json"),
            r#"{"version": 0, "saved_at": "2024-01-01T00:00:00Z", "session": {}}"#,
        )
        .unwrap();

        let result = store.load("old").await;
        assert!(matches!(
            result,
            Err(ColloquyError::VersionMismatch { expected: 1, found: 0 })
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();

        let mut older = sample_session("conv_a", 2);
        older.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.save(&older).await.unwrap();
        store.save(&sample_session("conv_b", 3)).await.unwrap();
        std::fs::write(tmp.path().join("junk.json"), "not json").unwrap();

        let listed = store.list().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["conv_b", "conv_a"]);
        assert_eq!(listed[0].turn_count, 3);
    }

    #[tokio::test]
    async fn test_session_path_sanitized() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        let path = store.save(&sample_session("../escape", 0)).await.unwrap();
        assert_eq!(path.parent().unwrap(), tmp.path());
        assert!(store.load("../escape").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path()).await.unwrap();
        for id in ["s1", "s2", "s3"] {
            store.save(&sample_session(id, 1)).await.unwrap();
        }
        assert_eq!(store.cleanup(1).await.unwrap(), 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete(&store.list().await.unwrap()[0].id).await.unwrap());
    }
}
