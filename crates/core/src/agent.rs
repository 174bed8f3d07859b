//! Agent identity and per-agent behaviour settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted agent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,

    /// Human-readable unique name, used to find the agent again on startup
    pub name: String,

    /// Self-description rendered under the persona heading
    pub persona: String,

    /// Instructions placed at the top of every assembled prompt
    pub system_prompt: String,

    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        persona: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            persona: persona.into(),
            system_prompt: system_prompt.into(),
            created_at: Utc::now(),
        }
    }
}

/// What the control loop does when a single tool call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Abort the whole turn and surface the error to the caller.
    Abort,
    /// Persist the failure as the tool result and let the model react.
    #[default]
    Record,
}
