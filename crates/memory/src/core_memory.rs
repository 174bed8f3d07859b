//! Core memory: named sections of always-resident, editable text.

use chrono::Utc;
use memtier_core::agent::AgentId;
use memtier_core::error::{MemoryError, Result};
use memtier_core::memory::{CoreMemorySection, MemoryStore, ReplaceMode};
use std::sync::Arc;
use tracing::debug;

/// Result of a `replace` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The first occurrence was substituted.
    Replaced,
    /// The target text was absent and the section was left as is.
    Unchanged,
}

/// The core memory tier of one agent.
#[derive(Clone)]
pub struct CoreMemory {
    agent_id: AgentId,
    store: Arc<dyn MemoryStore>,
    mode: ReplaceMode,
}

impl CoreMemory {
    pub fn new(agent_id: AgentId, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            agent_id,
            store,
            mode: ReplaceMode::default(),
        }
    }

    /// Set how `replace` treats text that is not present.
    pub fn with_replace_mode(mut self, mode: ReplaceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    fn not_found(&self, section: &str) -> MemoryError {
        MemoryError::SectionNotFound {
            agent_id: self.agent_id.to_string(),
            section: section.to_string(),
        }
    }

    async fn existing(&self, section: &str) -> Result<CoreMemorySection> {
        self.store
            .get_section(&self.agent_id, section)
            .await?
            .ok_or_else(|| self.not_found(section).into())
    }

    async fn write(&self, section: &str, content: &str) -> Result<()> {
        let updated = self
            .store
            .update_section(&self.agent_id, section, content, Utc::now())
            .await?;
        if !updated {
            return Err(self.not_found(section).into());
        }
        Ok(())
    }

    /// Concatenate `text` to the end of `section`. Never creates a section.
    pub async fn append(&self, section: &str, text: &str) -> Result<()> {
        let current = self.existing(section).await?;
        let content = format!("{}{}", current.content, text);
        self.write(section, &content).await?;
        debug!(agent_id = %self.agent_id, section, "Appended to core memory");
        Ok(())
    }

    /// Replace the first literal occurrence of `old` with `new`.
    ///
    /// An empty `old` never matches. When it does not match, `ReplaceMode`
    /// decides between a no-op and `MemoryError::ReplaceTargetMissing`.
    pub async fn replace(&self, section: &str, old: &str, new: &str) -> Result<ReplaceOutcome> {
        let current = self.existing(section).await?;

        if old.is_empty() || !current.content.contains(old) {
            return match self.mode {
                ReplaceMode::Lenient => {
                    debug!(agent_id = %self.agent_id, section, "Replace target absent; unchanged");
                    Ok(ReplaceOutcome::Unchanged)
                }
                ReplaceMode::Strict => Err(MemoryError::ReplaceTargetMissing {
                    section: section.to_string(),
                }
                .into()),
            };
        }

        let content = current.content.replacen(old, new, 1);
        self.write(section, &content).await?;
        debug!(agent_id = %self.agent_id, section, "Replaced text in core memory");
        Ok(ReplaceOutcome::Replaced)
    }

    pub async fn read(&self, section: &str) -> Result<Option<CoreMemorySection>> {
        Ok(self.store.get_section(&self.agent_id, section).await?)
    }

    /// All sections in creation order.
    pub async fn read_all(&self) -> Result<Vec<CoreMemorySection>> {
        Ok(self.store.list_sections(&self.agent_id).await?)
    }
}
