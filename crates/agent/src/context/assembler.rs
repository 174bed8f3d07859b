//! Context assembly and token-budget eviction.
//!
//! Every model call sees the same shape of prompt:
//!
//! 1. **Preamble** (one system turn): the agent's system prompt, its
//!    persona, and every core memory section inside a `<core_memory>` block
//! 2. **Active window**: every active message, oldest first
//!
//! When the estimate exceeds the budget the oldest active message is
//! embedded and moved to the recall index, one at a time, until the prompt
//! fits or the window is empty. Eviction is strictly FIFO.

use crate::context::token::{self, HeuristicTokenizer, Tokenizer};
use memtier_core::agent::{Agent, AgentId};
use memtier_core::embedding::EmbeddingProvider;
use memtier_core::error::{MemoryError, Result};
use memtier_core::memory::{CoreMemorySection, MemoryStore};
use memtier_core::message::{ActiveTurn, Message, Role};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The assembled prompt, ready for a chat call.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Preamble first, then the active window in creation order.
    pub messages: Vec<Message>,
    /// Estimated tokens of `messages`.
    pub token_estimate: usize,
    /// Configured token budget.
    pub budget: usize,
    /// Messages moved to the recall index while assembling.
    pub evicted: usize,
    /// Still over budget after the active window was exhausted.
    pub over_budget: bool,
}

/// Builds prompts for one agent and keeps them within budget.
pub struct ContextAssembler {
    agent_id: AgentId,
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    budget: usize,
}

impl ContextAssembler {
    pub fn new(
        agent_id: AgentId,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        budget: usize,
    ) -> Self {
        Self {
            agent_id,
            store,
            embedder,
            tokenizer: Arc::new(HeuristicTokenizer),
            budget,
        }
    }

    /// Count tokens with `tokenizer` instead of the byte heuristic.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Build `[preamble, ...active window]`. Side-effect free.
    pub async fn assemble(&self) -> Result<Vec<Message>> {
        let agent = self
            .store
            .get_agent(&self.agent_id)
            .await?
            .ok_or_else(|| MemoryError::AgentNotFound(self.agent_id.to_string()))?;
        let sections = self.store.list_sections(&self.agent_id).await?;
        let active = self.store.active_messages(&self.agent_id).await?;

        let mut messages = Vec::with_capacity(active.len() + 1);
        messages.push(Message::system(render_preamble(&agent, &sections)));
        messages.extend(active.iter().map(to_prompt_turn));
        Ok(messages)
    }

    /// Estimated tokens of `turns` under the configured tokenizer.
    pub fn estimate_tokens(&self, turns: &[Message]) -> usize {
        token::estimate_messages_tokens(self.tokenizer.as_ref(), turns)
    }

    /// Assemble, evicting the oldest active messages until within budget.
    ///
    /// Each pass evicts exactly one message, so this terminates after at
    /// most as many passes as there are active messages.
    pub async fn evict_and_assemble(&self) -> Result<AssembledContext> {
        let mut messages = self.assemble().await?;
        let mut token_estimate = self.estimate_tokens(&messages);
        let mut evicted = 0;

        while token_estimate > self.budget {
            let Some(oldest) = self.store.oldest_active(&self.agent_id).await? else {
                break;
            };

            let embedding = self.embedder.embed(&eviction_text(&oldest.message)).await?;
            let recalled = self.store.evict(oldest, embedding).await?;
            evicted += 1;
            debug!(
                agent_id = %self.agent_id,
                message_id = %recalled.id(),
                role = %recalled.message.role,
                "Evicted oldest active message"
            );

            messages = self.assemble().await?;
            token_estimate = self.estimate_tokens(&messages);
        }

        let over_budget = token_estimate > self.budget;
        if evicted > 0 {
            info!(
                agent_id = %self.agent_id,
                evicted,
                tokens = token_estimate,
                budget = self.budget,
                "Context window trimmed"
            );
        }
        if over_budget {
            warn!(
                agent_id = %self.agent_id,
                tokens = token_estimate,
                budget = self.budget,
                "Preamble alone exceeds the token budget"
            );
        }

        Ok(AssembledContext {
            messages,
            token_estimate,
            budget: self.budget,
            evicted,
            over_budget,
        })
    }
}

/// Render the system turn: prompt, persona, then core memory.
pub fn render_preamble(agent: &Agent, sections: &[CoreMemorySection]) -> String {
    let core_memory = sections
        .iter()
        .map(|s| format!("<{name}>{content}</{name}>", name = s.section, content = s.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\n## Persona\n{}\n\n## Working Memory\n\n<core_memory>\n{}\n</core_memory>",
        agent.system_prompt, agent.persona, core_memory
    )
}

/// Project a stored turn onto the fields its role sends to the model.
fn to_prompt_turn(turn: &ActiveTurn) -> Message {
    let source = &turn.message;
    let mut message = Message {
        id: source.id.clone(),
        role: source.role,
        content: source.content.clone(),
        tool_calls: Vec::new(),
        tool_call_id: None,
        name: None,
        timestamp: source.timestamp,
    };
    match source.role {
        Role::Assistant => message.tool_calls = source.tool_calls.clone(),
        Role::Tool => {
            message.tool_call_id = source.tool_call_id.clone();
            message.name = source.name.clone();
        }
        Role::User | Role::System => {}
    }
    message
}

/// Text embedded when a message is evicted. Never empty.
///
/// An assistant turn that only called tools is embedded as its calls. A
/// turn with neither content nor calls gets a placeholder naming its role,
/// or its tool for a tool result.
fn eviction_text(message: &Message) -> String {
    if !message.content.is_empty() {
        return message.content.clone();
    }
    if !message.tool_calls.is_empty() {
        return message
            .tool_calls
            .iter()
            .map(|tc| format!("{}({})", tc.name, tc.arguments))
            .collect::<Vec<_>>()
            .join("\n");
    }
    match (&message.role, &message.name) {
        (Role::Tool, Some(name)) => format!("[empty {name} result]"),
        (role, _) => format!("[empty {role} message]"),
    }
}
