//! SQLite storage backend for SprintPoker.
//!
//! Each record is kept as a JSON `data` column next to the indexed key
//! columns the queries filter on. Conditional session writes open a
//! transaction whose first statement is the guarded `UPDATE`; its
//! `rows_affected` decides the outcome and, once it succeeds, the
//! transaction holds the database write lock for the remaining statements.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::SecondsFormat;
use sprintpoker_core::{
    DailySnapshot, EstimationSession, ParticipantId, ProjectId, SessionId, Sprint, SprintId,
    Time, Vote, WorkItem, WorkItemId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::conditional;
use super::{BeginOutcome, Conditional, Finalized, Result, Storage, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Every in-memory connection is its own database, so the pool is pinned
    /// to a single connection that never expires.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS sprints (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                start_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                sprint_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                work_item_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS votes (
                session_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (session_id, participant_id)
            )",
            "CREATE TABLE IF NOT EXISTS snapshots (
                sprint_id TEXT NOT NULL,
                date TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (sprint_id, date)
            )",
            "CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_work_items_sprint ON work_items(sprint_id)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_work_item ON sessions(work_item_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn rollback_outcome<T>(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Sqlite>,
        id: SessionId,
    ) -> Result<Conditional<T>> {
        tx.rollback().await?;
        let mut conn = self.pool.acquire().await?;
        Ok(match fetch_session(&mut conn, id).await? {
            Some(session) => Conditional::Conflict(session),
            None => Conditional::Missing,
        })
    }
}

fn ts(t: Time) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

fn decode_all<T: serde::de::DeserializeOwned>(rows: &[SqliteRow]) -> Result<Vec<T>> {
    rows.iter().map(decode).collect()
}

async fn fetch_session(conn: &mut SqliteConnection, id: SessionId) -> Result<Option<EstimationSession>> {
    let row = sqlx::query("SELECT data FROM sessions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(decode).transpose()
}

async fn fetch_work_item(conn: &mut SqliteConnection, id: WorkItemId) -> Result<Option<WorkItem>> {
    let row = sqlx::query("SELECT data FROM work_items WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(decode).transpose()
}

async fn fetch_votes(conn: &mut SqliteConnection, session_id: SessionId) -> Result<Vec<Vote>> {
    let rows = sqlx::query(
        "SELECT data FROM votes WHERE session_id = ? ORDER BY created_at, participant_id",
    )
    .bind(session_id.to_string())
    .fetch_all(conn)
    .await?;
    decode_all(&rows)
}

async fn write_session(conn: &mut SqliteConnection, session: &EstimationSession) -> Result<()> {
    sqlx::query(
        "INSERT INTO sessions (id, work_item_id, state, created_at, data) VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET state = excluded.state, data = excluded.data",
    )
    .bind(session.id.to_string())
    .bind(session.work_item_id.to_string())
    .bind(session.state.as_str())
    .bind(ts(session.created_at))
    .bind(serde_json::to_string(session)?)
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_work_item(conn: &mut SqliteConnection, item: &WorkItem) -> Result<()> {
    sqlx::query(
        "INSERT INTO work_items (id, sprint_id, position, status, created_at, data) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            sprint_id = excluded.sprint_id,
            position = excluded.position,
            status = excluded.status,
            data = excluded.data",
    )
    .bind(item.id.to_string())
    .bind(item.sprint_id.to_string())
    .bind(item.position)
    .bind(item.status.as_str())
    .bind(ts(item.created_at))
    .bind(serde_json::to_string(item)?)
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_vote(conn: &mut SqliteConnection, vote: &Vote) -> Result<()> {
    sqlx::query(
        "INSERT INTO votes (session_id, participant_id, created_at, data) VALUES (?, ?, ?, ?)
         ON CONFLICT(session_id, participant_id) DO UPDATE SET data = excluded.data",
    )
    .bind(vote.session_id.to_string())
    .bind(vote.participant_id.as_str())
    .bind(ts(vote.created_at))
    .bind(serde_json::to_string(vote)?)
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_item_rows(conn: &mut SqliteConnection, id: WorkItemId) -> Result<()> {
    let key = id.to_string();
    sqlx::query("DELETE FROM votes WHERE session_id IN (SELECT id FROM sessions WHERE work_item_id = ?)")
        .bind(&key)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE work_item_id = ?")
        .bind(&key)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM work_items WHERE id = ?")
        .bind(&key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    // === Sprint operations ===

    async fn save_sprint(&self, sprint: &Sprint) -> Result<()> {
        sqlx::query(
            "INSERT INTO sprints (id, project_id, start_date, created_at, data) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                start_date = excluded.start_date,
                data = excluded.data",
        )
        .bind(sprint.id.to_string())
        .bind(sprint.project_id.to_string())
        .bind(sprint.start_date.to_string())
        .bind(ts(sprint.created_at))
        .bind(serde_json::to_string(sprint)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_sprint(&self, id: SprintId) -> Result<Option<Sprint>> {
        let row = sqlx::query("SELECT data FROM sprints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_sprints(&self, project_id: ProjectId) -> Result<Vec<Sprint>> {
        let rows = sqlx::query(
            "SELECT data FROM sprints WHERE project_id = ? ORDER BY start_date, created_at",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows)
    }

    async fn delete_sprint(&self, id: SprintId) -> Result<()> {
        let key = id.to_string();
        let mut tx = self.pool.begin().await?;

        let items = sqlx::query("SELECT id FROM work_items WHERE sprint_id = ?")
            .bind(&key)
            .fetch_all(&mut *tx)
            .await?;
        for row in items {
            let item_id: String = row.try_get("id")?;
            let item_id = WorkItemId::from_str(&item_id)
                .map_err(|e| StorageError::Corrupt(format!("work item id {}: {}", item_id, e)))?;
            delete_item_rows(&mut tx, item_id).await?;
        }
        sqlx::query("DELETE FROM snapshots WHERE sprint_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sprints WHERE id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // === Work item operations ===

    async fn save_work_item(&self, item: &WorkItem) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_work_item(&mut conn, item).await
    }

    async fn load_work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_work_item(&mut conn, id).await
    }

    async fn list_work_items(&self, sprint_id: SprintId) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            "SELECT data FROM work_items WHERE sprint_id = ? ORDER BY position, created_at",
        )
        .bind(sprint_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows)
    }

    async fn delete_work_item(&self, id: WorkItemId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_item_rows(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    // === Session operations ===

    async fn load_session(&self, id: SessionId) -> Result<Option<EstimationSession>> {
        let mut conn = self.pool.acquire().await?;
        fetch_session(&mut conn, id).await
    }

    async fn list_sessions(&self, work_item_id: WorkItemId) -> Result<Vec<EstimationSession>> {
        let rows = sqlx::query(
            "SELECT data FROM sessions WHERE work_item_id = ? ORDER BY created_at, id",
        )
        .bind(work_item_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows)
    }

    async fn begin_session(&self, session: &EstimationSession) -> Result<BeginOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE work_items SET status = 'voting' WHERE id = ? AND status != 'completed'",
        )
        .bind(session.work_item_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            let exists = self.load_work_item(session.work_item_id).await?.is_some();
            return Ok(if exists { BeginOutcome::ItemCompleted } else { BeginOutcome::ItemMissing });
        }

        let mut item = fetch_work_item(&mut tx, session.work_item_id).await?;
        let rows = sqlx::query(
            "SELECT data FROM sessions WHERE work_item_id = ? AND state IN ('active', 'revealed')",
        )
        .bind(session.work_item_id.to_string())
        .fetch_all(&mut *tx)
        .await?;
        let mut live: Vec<EstimationSession> = decode_all(&rows)?;

        let outcome = conditional::begin(item.as_mut(), live.iter_mut(), session);
        if let BeginOutcome::Started { superseded } = &outcome {
            for old in live.iter().filter(|s| superseded.contains(&s.id)) {
                write_session(&mut tx, old).await?;
            }
            write_session(&mut tx, session).await?;
            if let Some(item) = &item {
                write_work_item(&mut tx, item).await?;
            }
            tx.commit().await?;
            debug!(session_id = %session.id, superseded = superseded.len(), "session begun");
        }
        Ok(outcome)
    }

    async fn reveal_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE sessions SET state = 'revealed'
             WHERE id = ? AND state = 'active'
               AND EXISTS (SELECT 1 FROM votes WHERE votes.session_id = sessions.id)",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            return self.rollback_outcome(tx, id).await;
        }

        let mut session = fetch_session(&mut tx, id).await?;
        let vote_count = fetch_votes(&mut tx, id).await?.len();
        let outcome = conditional::reveal(session.as_mut(), vote_count, at);
        if let Conditional::Applied(updated) = &outcome {
            write_session(&mut tx, updated).await?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn reset_session(&self, id: SessionId, at: Time) -> Result<Conditional<EstimationSession>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE sessions SET state = 'active' WHERE id = ? AND state IN ('active', 'revealed')",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            return self.rollback_outcome(tx, id).await;
        }

        sqlx::query("DELETE FROM votes WHERE session_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let mut session = fetch_session(&mut tx, id).await?;
        let outcome = conditional::reset(session.as_mut(), at);
        if let Conditional::Applied(updated) = &outcome {
            write_session(&mut tx, updated).await?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn finalize_session(&self, id: SessionId, at: Time) -> Result<Conditional<Finalized>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE sessions SET state = 'finalized' WHERE id = ? AND state = 'revealed'",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            return self.rollback_outcome(tx, id).await;
        }

        // The claim holds the write lock, so no reset can slip in before the
        // votes are read.
        let mut session = fetch_session(&mut tx, id).await?;
        let votes = fetch_votes(&mut tx, id).await?;
        let mut item = match &session {
            Some(s) => fetch_work_item(&mut tx, s.work_item_id).await?,
            None => None,
        };
        // An error here drops the transaction, which rolls the claim back.
        let outcome = conditional::finalize(session.as_mut(), item.as_mut(), votes, at)?;
        match &outcome {
            Conditional::Applied(done) => {
                write_work_item(&mut tx, &done.work_item).await?;
                write_session(&mut tx, &done.session).await?;
                tx.commit().await?;
            }
            _ => tx.rollback().await?,
        }
        Ok(outcome)
    }

    // === Vote operations ===

    async fn upsert_vote(&self, vote: &Vote) -> Result<Conditional<Vote>> {
        let mut tx = self.pool.begin().await?;

        // No-op write: takes the write lock and checks the state in one statement.
        let claimed = sqlx::query(
            "UPDATE sessions SET state = state WHERE id = ? AND state = 'active'",
        )
        .bind(vote.session_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            return self.rollback_outcome(tx, vote.session_id).await;
        }

        let session = fetch_session(&mut tx, vote.session_id).await?;
        let mut votes = fetch_votes(&mut tx, vote.session_id).await?;
        let outcome = conditional::upsert(session.as_ref(), &mut votes, vote);
        if let Conditional::Applied(stored) = &outcome {
            write_vote(&mut tx, stored).await?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn load_vote(&self, session_id: SessionId, participant_id: &ParticipantId) -> Result<Option<Vote>> {
        let row = sqlx::query("SELECT data FROM votes WHERE session_id = ? AND participant_id = ?")
            .bind(session_id.to_string())
            .bind(participant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_votes(&self, session_id: SessionId) -> Result<Vec<Vote>> {
        let mut conn = self.pool.acquire().await?;
        fetch_votes(&mut conn, session_id).await
    }

    // === Snapshot operations ===

    async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (sprint_id, date, data) VALUES (?, ?, ?)
             ON CONFLICT(sprint_id, date) DO UPDATE SET
                data = json_set(excluded.data, '$.id', json_extract(snapshots.data, '$.id'))",
        )
        .bind(snapshot.sprint_id.to_string())
        .bind(snapshot.date.to_string())
        .bind(serde_json::to_string(snapshot)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_snapshots(&self, sprint_id: SprintId) -> Result<Vec<DailySnapshot>> {
        let rows = sqlx::query("SELECT data FROM snapshots WHERE sprint_id = ? ORDER BY date")
            .bind(sprint_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }
}
