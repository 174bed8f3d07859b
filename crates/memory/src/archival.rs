//! Archival memory: long-term notes the agent saves deliberately.

use chrono::{DateTime, Utc};
use memtier_core::agent::AgentId;
use memtier_core::embedding::EmbeddingProvider;
use memtier_core::error::Result;
use memtier_core::memory::{ArchivalRecord, MemoryStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalHit {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
}

#[derive(Clone)]
pub struct ArchivalStore {
    agent_id: AgentId,
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ArchivalStore {
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

    /// Embed and persist a new record. Returns its id.
    pub async fn insert(&self, content: &str) -> Result<String> {
        let embedding = self.embedder.embed(content).await?;
        let record = ArchivalRecord::new(self.agent_id.clone(), content, embedding);
        self.store.insert_archival(&record).await?;
        debug!(agent_id = %self.agent_id, record_id = %record.id, "Saved archival record");
        Ok(record.id)
    }

    /// Up to `limit` records, most similar to `query` first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ArchivalHit>> {
        let query_embedding = self.embedder.embed(query).await?;
        let scored = self
            .store
            .search_archival(&self.agent_id, &query_embedding, limit)
            .await?;

        debug!(agent_id = %self.agent_id, hits = scored.len(), "Archival search");
        Ok(scored
            .into_iter()
            .map(|s| ArchivalHit {
                id: s.item.id,
                content: s.item.content,
                created_at: s.item.created_at,
                similarity: s.similarity,
            })
            .collect())
    }
}
