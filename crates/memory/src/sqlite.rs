//! SQLite backend for all three memory tiers.
//!
//! Uses a single SQLite database file with four tables:
//! - `agents`: one row per agent, unique by name
//! - `core_memory`: named sections, unique per (agent, section)
//! - `messages`: the message log; `active` splits it into the active
//!   window and the recall index, `seq` orders it
//! - `archival_memory`: saved notes with their embeddings
//!
//! Embeddings are stored as little-endian f32 BLOBs and ranked in Rust.

use crate::vector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memtier_core::agent::{Agent, AgentId};
use memtier_core::error::MemoryError;
use memtier_core::memory::{
    ArchivalRecord, CoreMemorySection, MemoryStore, MessageCounts, Scored,
};
use memtier_core::message::{ActiveTurn, Message, MessageToolCall, RecalledTurn, Role};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// A production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful
    /// for tests). `storage_timeout` bounds both pool acquisition and lock
    /// waits.
    pub async fn new(path: &str, storage_timeout: Duration) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(storage_timeout)
            .pragma("foreign_keys", "ON");

        // Every connection to ":memory:" is its own database, so the single
        // connection must never be recycled.
        let in_memory = path.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .acquire_timeout(storage_timeout);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id            TEXT PRIMARY KEY,
                name          TEXT UNIQUE NOT NULL,
                persona       TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agents table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS core_memory (
                iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id   TEXT NOT NULL REFERENCES agents(id),
                section    TEXT NOT NULL,
                content    TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(agent_id, section)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("core_memory table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                agent_id     TEXT NOT NULL REFERENCES agents(id),
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                tool_calls   TEXT NOT NULL DEFAULT '[]',
                tool_call_id TEXT,
                name         TEXT,
                active       INTEGER NOT NULL DEFAULT 1,
                embedding    BLOB,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_agent_active ON messages(agent_id, active, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archival_memory (
                iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT UNIQUE NOT NULL,
                agent_id   TEXT NOT NULL REFERENCES agents(id),
                content    TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("archival_memory table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_archival_agent ON archival_memory(agent_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("archival index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MemoryError::QueryFailed(format!("timestamp {raw:?}: {e}")))
    }

    fn row_to_agent(row: &SqliteRow) -> Result<Agent, MemoryError> {
        let created_at: String = Self::column(row, "created_at")?;
        Ok(Agent {
            id: AgentId(Self::column(row, "id")?),
            name: Self::column(row, "name")?,
            persona: Self::column(row, "persona")?,
            system_prompt: Self::column(row, "system_prompt")?,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    fn row_to_section(row: &SqliteRow) -> Result<CoreMemorySection, MemoryError> {
        let updated_at: String = Self::column(row, "updated_at")?;
        Ok(CoreMemorySection {
            agent_id: AgentId(Self::column(row, "agent_id")?),
            section: Self::column(row, "section")?,
            content: Self::column(row, "content")?,
            updated_at: Self::parse_timestamp(&updated_at)?,
        })
    }

    /// Parse `(seq, agent_id, message)` from a `messages` row.
    fn row_to_message(row: &SqliteRow) -> Result<(i64, AgentId, Message), MemoryError> {
        let role: String = Self::column(row, "role")?;
        let role = Role::from_str(&role).map_err(MemoryError::QueryFailed)?;
        let tool_calls_json: String = Self::column(row, "tool_calls")?;
        let tool_calls: Vec<MessageToolCall> = serde_json::from_str(&tool_calls_json)
            .map_err(|e| MemoryError::QueryFailed(format!("tool_calls column: {e}")))?;
        let created_at: String = Self::column(row, "created_at")?;

        let message = Message {
            id: Self::column(row, "id")?,
            role,
            content: Self::column(row, "content")?,
            tool_calls,
            tool_call_id: Self::column(row, "tool_call_id")?,
            name: Self::column(row, "name")?,
            timestamp: Self::parse_timestamp(&created_at)?,
        };
        Ok((
            Self::column(row, "seq")?,
            AgentId(Self::column(row, "agent_id")?),
            message,
        ))
    }

    fn row_to_active(row: &SqliteRow) -> Result<ActiveTurn, MemoryError> {
        let (seq, agent_id, message) = Self::row_to_message(row)?;
        Ok(ActiveTurn {
            seq,
            agent_id,
            message,
        })
    }

    fn row_to_recalled(row: &SqliteRow) -> Result<RecalledTurn, MemoryError> {
        let (seq, agent_id, message) = Self::row_to_message(row)?;
        let blob: Option<Vec<u8>> = Self::column(row, "embedding")?;
        Ok(RecalledTurn {
            seq,
            agent_id,
            message,
            embedding: blob.map(|b| vector::blob_to_embedding(&b)).unwrap_or_default(),
        })
    }

    fn row_to_archival(row: &SqliteRow) -> Result<ArchivalRecord, MemoryError> {
        let created_at: String = Self::column(row, "created_at")?;
        let blob: Vec<u8> = Self::column(row, "embedding")?;
        Ok(ArchivalRecord {
            id: Self::column(row, "id")?,
            agent_id: AgentId(Self::column(row, "agent_id")?),
            content: Self::column(row, "content")?,
            embedding: vector::blob_to_embedding(&blob),
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    async fn count_where_active(
        &self,
        agent_id: &AgentId,
        active: bool,
    ) -> Result<usize, MemoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE agent_id = ?1 AND active = ?2")
                .bind(agent_id.as_str())
                .bind(active)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("Message count: {e}")))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO agents (id, name, persona, system_prompt, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(agent.id.as_str())
        .bind(&agent.name)
        .bind(&agent.persona)
        .bind(&agent.system_prompt)
        .bind(agent.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT agent failed: {e}")))?;

        debug!(agent = %agent.name, "Stored agent");
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, MemoryError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Agent lookup: {e}")))?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, MemoryError> {
        let row = sqlx::query("SELECT * FROM agents WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Agent lookup by name: {e}")))?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn insert_section(&self, section: &CoreMemorySection) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO core_memory (agent_id, section, content, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(section.agent_id.as_str())
        .bind(&section.section)
        .bind(&section.content)
        .bind(section.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT section failed: {e}")))?;
        Ok(())
    }

    async fn get_section(
        &self,
        agent_id: &AgentId,
        section: &str,
    ) -> Result<Option<CoreMemorySection>, MemoryError> {
        let row = sqlx::query("SELECT * FROM core_memory WHERE agent_id = ?1 AND section = ?2")
            .bind(agent_id.as_str())
            .bind(section)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Section lookup: {e}")))?;
        row.as_ref().map(Self::row_to_section).transpose()
    }

    async fn list_sections(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<CoreMemorySection>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM core_memory WHERE agent_id = ?1 ORDER BY iid")
            .bind(agent_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Section list: {e}")))?;
        rows.iter().map(Self::row_to_section).collect()
    }

    async fn update_section(
        &self,
        agent_id: &AgentId,
        section: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            "UPDATE core_memory SET content = ?1, updated_at = ?2 WHERE agent_id = ?3 AND section = ?4",
        )
        .bind(content)
        .bind(updated_at.to_rfc3339())
        .bind(agent_id.as_str())
        .bind(section)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("UPDATE section failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        agent_id: &AgentId,
        message: Message,
    ) -> Result<ActiveTurn, MemoryError> {
        let tool_calls_json = serde_json::to_string(&message.tool_calls)
            .map_err(|e| MemoryError::Storage(format!("Tool call serialization: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, agent_id, role, content, tool_calls, tool_call_id, name, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
            "#,
        )
        .bind(&message.id)
        .bind(agent_id.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&tool_calls_json)
        .bind(&message.tool_call_id)
        .bind(&message.name)
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT message failed: {e}")))?;

        Ok(ActiveTurn {
            seq: result.last_insert_rowid(),
            agent_id: agent_id.clone(),
            message,
        })
    }

    async fn active_messages(&self, agent_id: &AgentId) -> Result<Vec<ActiveTurn>, MemoryError> {
        let rows =
            sqlx::query("SELECT * FROM messages WHERE agent_id = ?1 AND active = 1 ORDER BY seq")
                .bind(agent_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("Active window: {e}")))?;
        rows.iter().map(Self::row_to_active).collect()
    }

    async fn oldest_active(&self, agent_id: &AgentId) -> Result<Option<ActiveTurn>, MemoryError> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE agent_id = ?1 AND active = 1 ORDER BY seq LIMIT 1",
        )
        .bind(agent_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Oldest active: {e}")))?;
        row.as_ref().map(Self::row_to_active).transpose()
    }

    async fn evict(
        &self,
        turn: ActiveTurn,
        embedding: Vec<f32>,
    ) -> Result<RecalledTurn, MemoryError> {
        // Flag flip and embedding land in one statement, guarded on `active`.
        let result = sqlx::query(
            "UPDATE messages SET active = 0, embedding = ?1 WHERE id = ?2 AND agent_id = ?3 AND active = 1",
        )
        .bind(vector::embedding_to_blob(&embedding))
        .bind(turn.id())
        .bind(turn.agent_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Eviction failed: {e}")))?;

        if result.rows_affected() != 1 {
            return Err(MemoryError::AlreadyEvicted(turn.id().to_string()));
        }

        debug!(message_id = %turn.id(), "Evicted message to recall index");
        Ok(turn.evict(embedding))
    }

    async fn search_recalled(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<RecalledTurn>>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE agent_id = ?1 AND active = 0 AND embedding IS NOT NULL ORDER BY seq",
        )
        .bind(agent_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Recall scan: {e}")))?;

        let turns = rows
            .iter()
            .map(Self::row_to_recalled)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vector::top_k(turns, query_embedding, limit, |t| {
            t.embedding.as_slice()
        }))
    }

    async fn count_messages(&self, agent_id: &AgentId) -> Result<MessageCounts, MemoryError> {
        Ok(MessageCounts {
            active: self.count_where_active(agent_id, true).await?,
            recalled: self.count_where_active(agent_id, false).await?,
        })
    }

    async fn insert_archival(&self, record: &ArchivalRecord) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO archival_memory (id, agent_id, content, embedding, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.id)
        .bind(record.agent_id.as_str())
        .bind(&record.content)
        .bind(vector::embedding_to_blob(&record.embedding))
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT archival failed: {e}")))?;

        debug!(record_id = %record.id, "Stored archival record");
        Ok(())
    }

    async fn search_archival(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ArchivalRecord>>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM archival_memory WHERE agent_id = ?1 ORDER BY iid")
            .bind(agent_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Archival scan: {e}")))?;

        let records = rows
            .iter()
            .map(Self::row_to_archival)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vector::top_k(records, query_embedding, limit, |r| {
            r.embedding.as_slice()
        }))
    }

    async fn count_archival(&self, agent_id: &AgentId) -> Result<usize, MemoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archival_memory WHERE agent_id = ?1")
                .bind(agent_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("Archival count: {e}")))?;
        Ok(count as usize)
    }
}
