//! Memory records and the persistence adapter trait.
//!
//! One [`MemoryStore`] backs all three memory tiers of an agent:
//! - core memory sections (always rendered into the prompt)
//! - the message log, split into active and recalled turns
//! - archival records (deliberately saved notes)
//!
//! Similarity queries take a precomputed query embedding; embedding text is
//! the job of the tier components, not the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{Agent, AgentId};
use crate::error::MemoryError;
use crate::message::{ActiveTurn, Message, RecalledTurn};

/// A named, always-resident block of editable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMemorySection {
    pub agent_id: AgentId,

    /// Section key, unique per agent (e.g. "human", "persona")
    pub section: String,

    pub content: String,

    pub updated_at: DateTime<Utc>,
}

impl CoreMemorySection {
    pub fn new(agent_id: AgentId, section: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_id,
            section: section.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

/// A long-term note saved by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivalRecord {
    pub id: String,
    pub agent_id: AgentId,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl ArchivalRecord {
    pub fn new(agent_id: AgentId, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            content: content.into(),
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// A search result with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub similarity: f32,
}

/// How `core_memory_replace` treats text that is not present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    /// Leave the section untouched and report success.
    #[default]
    Lenient,
    /// Fail with `MemoryError::ReplaceTargetMissing`.
    Strict,
}

/// Per-agent message totals, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub active: usize,
    pub recalled: usize,
}

/// The persistence adapter.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral sessions).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    // --- Agents ---

    async fn insert_agent(&self, agent: &Agent) -> Result<(), MemoryError>;

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, MemoryError>;

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, MemoryError>;

    // --- Core memory ---

    /// Create a section. Fails if the (agent, section) pair already exists.
    async fn insert_section(&self, section: &CoreMemorySection) -> Result<(), MemoryError>;

    async fn get_section(
        &self,
        agent_id: &AgentId,
        section: &str,
    ) -> Result<Option<CoreMemorySection>, MemoryError>;

    /// All sections of an agent in creation order.
    async fn list_sections(&self, agent_id: &AgentId)
    -> Result<Vec<CoreMemorySection>, MemoryError>;

    /// Overwrite a section's content. Returns `false` if it does not exist.
    async fn update_section(
        &self,
        agent_id: &AgentId,
        section: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;

    // --- Message log ---

    /// Append a message to the end of the active window.
    async fn append_message(
        &self,
        agent_id: &AgentId,
        message: Message,
    ) -> Result<ActiveTurn, MemoryError>;

    /// The active window in creation order.
    async fn active_messages(&self, agent_id: &AgentId) -> Result<Vec<ActiveTurn>, MemoryError>;

    async fn oldest_active(&self, agent_id: &AgentId) -> Result<Option<ActiveTurn>, MemoryError>;

    /// Atomically mark `turn` evicted and store its embedding.
    ///
    /// Fails with `MemoryError::AlreadyEvicted` if the row is no longer
    /// active.
    async fn evict(
        &self,
        turn: ActiveTurn,
        embedding: Vec<f32>,
    ) -> Result<RecalledTurn, MemoryError>;

    /// Top-`limit` recalled turns by descending cosine similarity.
    async fn search_recalled(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<RecalledTurn>>, MemoryError>;

    async fn count_messages(&self, agent_id: &AgentId) -> Result<MessageCounts, MemoryError>;

    // --- Archival ---

    async fn insert_archival(&self, record: &ArchivalRecord) -> Result<(), MemoryError>;

    /// Top-`limit` archival records by descending cosine similarity.
    async fn search_archival(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ArchivalRecord>>, MemoryError>;

    async fn count_archival(&self, agent_id: &AgentId) -> Result<usize, MemoryError>;
}
