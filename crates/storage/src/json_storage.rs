//! JSON file storage implementation.
//!
//! Stores one JSON document per entity under a root directory and keeps a
//! small per-object meta marker (version + updated_at). Votes and snapshots
//! are stored as one document per session and per sprint respectively, which
//! makes their `(session, participant)` and `(sprint, date)` keys unique by
//! construction.
//!
//! Every mutation runs under a single writer lock: an in-process mutex plus
//! an exclusive advisory lock on `<root>/.lock`, so several processes can
//! share one directory. Documents are replaced by renaming a uniquely named
//! temp file over them, so readers never see a half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sprintpoker_core::{
    DailySnapshot, EstimationSession, ParticipantId, ProjectId, SessionId, Sprint, SprintId,
    Time, Vote, WorkItem, WorkItemId,
};
use fs4::fs_std::FileExt;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::conditional;
use super::{BeginOutcome, Conditional, Finalized, Result, Storage, StorageError};

const LOCK_FILE: &str = ".lock";

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    writer: Mutex<()>,
}

/// Exclusive write access to the store. Closing the lock file releases the
/// advisory lock.
struct WriteGuard<'a> {
    _file: std::fs::File,
    _local: MutexGuard<'a, ()>,
}

impl JsonStorage {
    /// Create storage, creating the subdirectories it needs under `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for kind in ["sprints", "work_items", "sessions", "votes", "snapshots"] {
            fs::create_dir_all(root.join(kind)).await?;
            fs::create_dir_all(root.join("meta").join(kind)).await?;
        }

        Ok(Self {
            root,
            writer: Mutex::new(()),
        })
    }

    /// Take the in-process writer lock, then the cross-process file lock.
    async fn write_lock(&self) -> Result<WriteGuard<'_>> {
        let local = self.writer.lock().await;
        let path = self.root.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(task_failed)??;

        Ok(WriteGuard {
            _file: file,
            _local: local,
        })
    }

    fn sprint_path(&self, id: SprintId) -> PathBuf {
        self.root.join("sprints").join(format!("{}.json", id))
    }
    fn work_item_path(&self, id: WorkItemId) -> PathBuf {
        self.root.join("work_items").join(format!("{}.json", id))
    }
    fn session_path(&self, id: SessionId) -> PathBuf {
        self.root.join("sessions").join(format!("{}.json", id))
    }
    fn votes_path(&self, session_id: SessionId) -> PathBuf {
        self.root.join("votes").join(format!("{}.json", session_id))
    }
    fn snapshots_path(&self, sprint_id: SprintId) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", sprint_id))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_atomic(&path, serde_json::to_string_pretty(&meta)?.into_bytes()).await?;
        Ok(version)
    }

    async fn put<T: serde::Serialize>(&self, kind: &str, id: &str, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        write_atomic(path, json.into_bytes()).await?;
        let version = self.bump_version(kind, id).await?;
        debug!(kind, id, version, "document written");
        Ok(())
    }

    async fn remove(&self, kind: &str, id: &str, path: &Path) -> Result<()> {
        remove_if_exists(path).await?;
        remove_if_exists(&self.meta_path(kind, id)).await
    }

    async fn put_session(&self, session: &EstimationSession) -> Result<()> {
        self.put("sessions", &session.id.to_string(), &self.session_path(session.id), session)
            .await
    }

    async fn put_work_item(&self, item: &WorkItem) -> Result<()> {
        self.put("work_items", &item.id.to_string(), &self.work_item_path(item.id), item)
            .await
    }

    async fn put_votes(&self, session_id: SessionId, votes: &[Vote]) -> Result<()> {
        self.put("votes", &session_id.to_string(), &self.votes_path(session_id), &votes)
            .await
    }

    async fn read_votes(&self, session_id: SessionId) -> Result<Vec<Vote>> {
        Ok(read_json(&self.votes_path(session_id)).await?.unwrap_or_default())
    }

    async fn sessions_of(&self, work_item_id: WorkItemId) -> Result<Vec<EstimationSession>> {
        let all: Vec<EstimationSession> = list_dir(&self.root.join("sessions")).await?;
        Ok(all.into_iter().filter(|s| s.work_item_id == work_item_id).collect())
    }

    /// Remove a work item and everything it owns. Caller holds the write lock.
    async fn remove_work_item(&self, id: WorkItemId) -> Result<()> {
        for session in self.sessions_of(id).await? {
            let sid = session.id.to_string();
            self.remove("sessions", &sid, &self.session_path(session.id)).await?;
            self.remove("votes", &sid, &self.votes_path(session.id)).await?;
        }
        self.remove("work_items", &id.to_string(), &self.work_item_path(id)).await
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_sprint(&self, sprint: &Sprint) -> Result<()> {
        let _guard = self.write_lock().await?;
        self.put("sprints", &sprint.id.to_string(), &self.sprint_path(sprint.id), sprint)
            .await
    }

    async fn load_sprint(&self, id: SprintId) -> Result<Option<Sprint>> {
        read_json(&self.sprint_path(id)).await
    }

    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>> {
        let all: Vec<Sprint> = list_dir(&self.root.join("sprints")).await?;
        let mut sprints: Vec<Sprint> = all.into_iter().filter(|s| s.project_id == project_id).collect();
        sprints.sort_by_key(|s| (s.start_date, s.created_at));
        Ok(sprints)
    }

    async fn delete_sprint(&self, id: SprintId) -> Result<()> {
        let _guard = self.write_lock().await?;
        let items: Vec<WorkItem> = list_dir(&self.root.join("work_items")).await?;
        for item in items.into_iter().filter(|i| i.sprint_id == id) {
            self.remove_work_item(item.id).await?;
        }
        let key = id.to_string();
        self.remove("snapshots", &key, &self.snapshots_path(id)).await?;
        self.remove("sprints", &key, &self.sprint_path(id)).await
    }

    async fn save_work_item(&self, item: &WorkItem) -> Result<()> {
        let _guard = self.write_lock().await?;
        self.put_work_item(item).await
    }

    async fn load_work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        read_json(&self.work_item_path(id)).await
    }

    async fn list_work_items(&self, sprint_id: SprintId) -> Result<Vec<WorkItem>> {
        let all: Vec<WorkItem> = list_dir(&self.root.join("work_items")).await?;
        let mut items: Vec<WorkItem> = all.into_iter().filter(|i| i.sprint_id == sprint_id).collect();
        items.sort_by_key(|i| (i.position, i.created_at));
        Ok(items)
    }

    async fn delete_work_item(&self, id: WorkItemId) -> Result<()> {
        let _guard = self.write_lock().await?;
        self.remove_work_item(id).await
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<EstimationSession>> {
        read_json(&self.session_path(id)).await
    }

    async fn list_sessions(&self, work_item_id: WorkItemId) -> Result<Vec<EstimationSession>> {
        let mut sessions = self.sessions_of(work_item_id).await?;
        sessions.sort_by_key(|s| (s.created_at, s.id));
        Ok(sessions)
    }

    async fn begin_session(&self, session: &EstimationSession) -> Result<BeginOutcome> {
        let _guard = self.write_lock().await?;
        let mut item: Option<WorkItem> = read_json(&self.work_item_path(session.work_item_id)).await?;
        let mut existing = self.sessions_of(session.work_item_id).await?;

        let outcome = conditional::begin(item.as_mut(), existing.iter_mut(), session);
        if let BeginOutcome::Started { superseded } = &outcome {
            for old in existing.iter().filter(|s| superseded.contains(&s.id)) {
                self.put_session(old).await?;
            }
            self.put_session(session).await?;
            if let Some(item) = &item {
                self.put_work_item(item).await?;
            }
        }
        Ok(outcome)
    }

    async fn reveal_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let _guard = self.write_lock().await?;
        let mut session: Option<EstimationSession> = read_json(&self.session_path(id)).await?;
        let vote_count = self.read_votes(id).await?.len();

        let outcome = conditional::reveal(session.as_mut(), vote_count, at);
        if let Conditional::Applied(updated) = &outcome {
            self.put_session(updated).await?;
        }
        Ok(outcome)
    }

    async fn reset_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let _guard = self.write_lock().await?;
        let mut session: Option<EstimationSession> = read_json(&self.session_path(id)).await?;

        let outcome = conditional::reset(session.as_mut(), at);
        if let Conditional::Applied(updated) = &outcome {
            self.put_votes(id, &[]).await?;
            self.put_session(updated).await?;
        }
        Ok(outcome)
    }

    async fn finalize_session(&self, id: SessionId, at: Time) -> Result<Conditional<Finalized>> {
        let _guard = self.write_lock().await?;
        let mut session: Option<EstimationSession> = read_json(&self.session_path(id)).await?;
        let votes = self.read_votes(id).await?;
        let mut item: Option<WorkItem> = match &session {
            Some(s) => read_json(&self.work_item_path(s.work_item_id)).await?,
            None => None,
        };

        let outcome = conditional::finalize(session.as_mut(), item.as_mut(), votes, at)?;
        if let Conditional::Applied(done) = &outcome {
            self.put_work_item(&done.work_item).await?;
            self.put_session(&done.session).await?;
        }
        Ok(outcome)
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<Conditional<Vote>> {
        let _guard = self.write_lock().await?;
        let session: Option<EstimationSession> = read_json(&self.session_path(vote.session_id)).await?;
        let mut votes = self.read_votes(vote.session_id).await?;

        let outcome = conditional::upsert(session.as_ref(), &mut votes, vote);
        if outcome.is_applied() {
            self.put_votes(vote.session_id, &votes).await?;
        }
        Ok(outcome)
    }

    async fn load_vote(&self, session_id: SessionId, participant_id: &ParticipantId) -> Result<Option<Vote>> {
        Ok(self
            .read_votes(session_id)
            .await?
            .into_iter()
            .find(|v| &v.participant_id == participant_id))
    }

    async fn list_votes(&self, session_id: SessionId) -> Result<Vec<Vote>> {
        self.read_votes(session_id).await
    }

    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        let _guard = self.write_lock().await?;
        let path = self.snapshots_path(snapshot.sprint_id);
        let mut rows: Vec<DailySnapshot> = read_json(&path).await?.unwrap_or_default();

        match rows.iter_mut().find(|r| r.date == snapshot.date) {
            Some(existing) => {
                let id = existing.id;
                *existing = snapshot.clone();
                existing.id = id;
            }
            None => rows.push(snapshot.clone()),
        }
        rows.sort_by_key(|r| r.date);

        self.put("snapshots", &snapshot.sprint_id.to_string(), &path, &rows).await
    }

    async fn list_snapshots(&self, sprint_id: SprintId) -> Result<Vec<DailySnapshot>> {
        let mut rows: Vec<DailySnapshot> = read_json(&self.snapshots_path(sprint_id))
            .await?
            .unwrap_or_default();
        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Other(format!("{} has no parent directory", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(task_failed)?
}

fn task_failed(e: tokio::task::JoinError) -> StorageError {
    StorageError::Other(format!("blocking file task failed: {}", e))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
    })?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}
