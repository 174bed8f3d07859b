//! In-memory store, useful for testing and ephemeral sessions.
//!
//! Keeps the active window and the recall index as two separate
//! containers; eviction moves a turn from one to the other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memtier_core::agent::{Agent, AgentId};
use memtier_core::error::MemoryError;
use memtier_core::memory::{
    ArchivalRecord, CoreMemorySection, MemoryStore, MessageCounts, Scored,
};
use memtier_core::message::{ActiveTurn, Message, RecalledTurn};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vector;

#[derive(Default)]
struct State {
    agents: Vec<Agent>,
    sections: Vec<CoreMemorySection>,
    active: Vec<ActiveTurn>,
    recalled: Vec<RecalledTurn>,
    archival: Vec<ArchivalRecord>,
    next_seq: i64,
}

/// An in-memory store that keeps every tier in plain vectors.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        if state
            .agents
            .iter()
            .any(|a| a.id == agent.id || a.name == agent.name)
        {
            return Err(MemoryError::Storage(format!(
                "agent '{}' already exists",
                agent.name
            )));
        }
        state.agents.push(agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, MemoryError> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|a| &a.id == id).cloned())
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, MemoryError> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|a| a.name == name).cloned())
    }

    async fn insert_section(&self, section: &CoreMemorySection) -> Result<(), MemoryError> {
        let mut state = self.state.write().await;
        if state
            .sections
            .iter()
            .any(|s| s.agent_id == section.agent_id && s.section == section.section)
        {
            return Err(MemoryError::Storage(format!(
                "section '{}' already exists",
                section.section
            )));
        }
        state.sections.push(section.clone());
        Ok(())
    }

    async fn get_section(
        &self,
        agent_id: &AgentId,
        section: &str,
    ) -> Result<Option<CoreMemorySection>, MemoryError> {
        let state = self.state.read().await;
        Ok(state
            .sections
            .iter()
            .find(|s| &s.agent_id == agent_id && s.section == section)
            .cloned())
    }

    async fn list_sections(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<CoreMemorySection>, MemoryError> {
        let state = self.state.read().await;
        Ok(state
            .sections
            .iter()
            .filter(|s| &s.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn update_section(
        &self,
        agent_id: &AgentId,
        section: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let mut state = self.state.write().await;
        match state
            .sections
            .iter_mut()
            .find(|s| &s.agent_id == agent_id && s.section == section)
        {
            Some(s) => {
                s.content = content.to_string();
                s.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_message(
        &self,
        agent_id: &AgentId,
        message: Message,
    ) -> Result<ActiveTurn, MemoryError> {
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let turn = ActiveTurn {
            seq: state.next_seq,
            agent_id: agent_id.clone(),
            message,
        };
        state.active.push(turn.clone());
        Ok(turn)
    }

    async fn active_messages(&self, agent_id: &AgentId) -> Result<Vec<ActiveTurn>, MemoryError> {
        let state = self.state.read().await;
        Ok(state
            .active
            .iter()
            .filter(|t| &t.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn oldest_active(&self, agent_id: &AgentId) -> Result<Option<ActiveTurn>, MemoryError> {
        let state = self.state.read().await;
        Ok(state
            .active
            .iter()
            .find(|t| &t.agent_id == agent_id)
            .cloned())
    }

    async fn evict(
        &self,
        turn: ActiveTurn,
        embedding: Vec<f32>,
    ) -> Result<RecalledTurn, MemoryError> {
        let mut state = self.state.write().await;
        let position = state
            .active
            .iter()
            .position(|t| t.agent_id == turn.agent_id && t.id() == turn.id())
            .ok_or_else(|| MemoryError::AlreadyEvicted(turn.id().to_string()))?;
        state.active.remove(position);

        let recalled = turn.evict(embedding);
        state.recalled.push(recalled.clone());
        debug!(message_id = %recalled.id(), "Evicted message to recall index");
        Ok(recalled)
    }

    async fn search_recalled(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<RecalledTurn>>, MemoryError> {
        let state = self.state.read().await;
        let candidates: Vec<RecalledTurn> = state
            .recalled
            .iter()
            .filter(|t| &t.agent_id == agent_id)
            .cloned()
            .collect();
        Ok(vector::top_k(candidates, query_embedding, limit, |t| {
            t.embedding.as_slice()
        }))
    }

    async fn count_messages(&self, agent_id: &AgentId) -> Result<MessageCounts, MemoryError> {
        let state = self.state.read().await;
        Ok(MessageCounts {
            active: state.active.iter().filter(|t| &t.agent_id == agent_id).count(),
            recalled: state
                .recalled
                .iter()
                .filter(|t| &t.agent_id == agent_id)
                .count(),
        })
    }

    async fn insert_archival(&self, record: &ArchivalRecord) -> Result<(), MemoryError> {
        self.state.write().await.archival.push(record.clone());
        Ok(())
    }

    async fn search_archival(
        &self,
        agent_id: &AgentId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Scored<ArchivalRecord>>, MemoryError> {
        let state = self.state.read().await;
        let candidates: Vec<ArchivalRecord> = state
            .archival
            .iter()
            .filter(|r| &r.agent_id == agent_id)
            .cloned()
            .collect();
        Ok(vector::top_k(candidates, query_embedding, limit, |r| {
            r.embedding.as_slice()
        }))
    }

    async fn count_archival(&self, agent_id: &AgentId) -> Result<usize, MemoryError> {
        let state = self.state.read().await;
        Ok(state
            .archival
            .iter()
            .filter(|r| &r.agent_id == agent_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_agent() -> (InMemoryStore, AgentId) {
        let store = InMemoryStore::new();
        let agent = Agent::new("sam", "I am Sam.", "You are helpful.");
        store.insert_agent(&agent).await.unwrap();
        (store, agent.id)
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequence() {
        let (store, agent) = store_with_agent().await;
        let a = store.append_message(&agent, Message::user("one")).await.unwrap();
        let b = store.append_message(&agent, Message::user("two")).await.unwrap();
        assert!(b.seq > a.seq);

        let active = store.active_messages(&agent).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].message.content, "one");
    }

    #[tokio::test]
    async fn evict_moves_turn_between_tiers() {
        let (store, agent) = store_with_agent().await;
        store.append_message(&agent, Message::user("old")).await.unwrap();
        store.append_message(&agent, Message::user("new")).await.unwrap();

        let oldest = store.oldest_active(&agent).await.unwrap().unwrap();
        assert_eq!(oldest.message.content, "old");
        let recalled = store.evict(oldest, vec![1.0, 0.0]).await.unwrap();
        assert_eq!(recalled.message.content, "old");

        let counts = store.count_messages(&agent).await.unwrap();
        assert_eq!(counts, MessageCounts { active: 1, recalled: 1 });
    }

    #[tokio::test]
    async fn double_eviction_is_rejected() {
        let (store, agent) = store_with_agent().await;
        let turn = store.append_message(&agent, Message::user("x")).await.unwrap();
        store.evict(turn.clone(), vec![1.0]).await.unwrap();
        let err = store.evict(turn, vec![1.0]).await.unwrap_err();
        assert!(matches!(err, MemoryError::AlreadyEvicted(_)));
    }

    #[tokio::test]
    async fn tiers_are_scoped_per_agent() {
        let (store, agent) = store_with_agent().await;
        let other = Agent::new("other", "p", "s");
        store.insert_agent(&other).await.unwrap();

        store.append_message(&agent, Message::user("mine")).await.unwrap();
        store
            .insert_archival(&ArchivalRecord::new(other.id.clone(), "theirs", vec![1.0]))
            .await
            .unwrap();

        assert!(store.active_messages(&other.id).await.unwrap().is_empty());
        assert!(store.search_archival(&agent, &[1.0], 10).await.unwrap().is_empty());
        assert_eq!(store.count_archival(&other.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sections_are_unique_per_agent() {
        let (store, agent) = store_with_agent().await;
        let section = CoreMemorySection::new(agent.clone(), "human", "");
        store.insert_section(&section).await.unwrap();
        assert!(store.insert_section(&section).await.is_err());

        let updated = store
            .update_section(&agent, "human", "Name: Dana", Utc::now())
            .await
            .unwrap();
        assert!(updated);
        let missing = store
            .update_section(&agent, "nope", "x", Utc::now())
            .await
            .unwrap();
        assert!(!missing);
    }
}
