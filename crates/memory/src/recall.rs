//! Recall memory: similarity search over evicted messages.

use chrono::{DateTime, Utc};
use memtier_core::agent::AgentId;
use memtier_core::embedding::EmbeddingProvider;
use memtier_core::error::Result;
use memtier_core::memory::MemoryStore;
use memtier_core::message::Role;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One recalled message, as returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
}

/// Read-only view over an agent's evicted messages.
#[derive(Clone)]
pub struct RecallStore {
    agent_id: AgentId,
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RecallStore {
    pub fn new(
        agent_id: AgentId,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            agent_id,
            store,
            embedder,
        }
    }

    /// Up to `limit` evicted messages, most similar to `query` first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RecallHit>> {
        let query_embedding = self.embedder.embed(query).await?;
        let scored = self
            .store
            .search_recalled(&self.agent_id, &query_embedding, limit)
            .await?;

        debug!(agent_id = %self.agent_id, hits = scored.len(), "Recall search");
        Ok(scored
            .into_iter()
            .map(|s| RecallHit {
                id: s.item.id().to_string(),
                role: s.item.message.role,
                created_at: s.item.created_at(),
                content: s.item.message.content,
                similarity: s.similarity,
            })
            .collect())
    }
}
