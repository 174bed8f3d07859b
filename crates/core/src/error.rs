//! Error types for the memtier domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (chat provider, embeddings, storage, tools) has its
//! own error enum, folded into the top-level [`Error`].

use thiserror::Error;

/// The top-level error type for all memtier operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Chat provider errors ---
    #[error("Chat provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Memory / persistence errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Turn cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is a missing agent or core-memory section.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Memory(MemoryError::AgentNotFound(_) | MemoryError::SectionNotFound { .. })
        )
    }

    /// Whether the failure belongs to a single tool call rather than the
    /// turn as a whole. These are the failures that can be recorded as a
    /// tool result instead of aborting.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Tool(_)
                | Error::Memory(
                    MemoryError::SectionNotFound { .. } | MemoryError::ReplaceTargetMissing { .. }
                )
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Transient failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// The endpoint or the transport failed; retried only when the cause is.
    #[error("Embedding request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Embedding provider returned no vector")]
    EmptyResponse,

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding request timed out after {0}s")]
    Timeout(u64),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Provider(e) => e.is_transient(),
            EmbeddingError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Core memory section '{section}' not found for agent {agent_id}")]
    SectionNotFound { agent_id: String, section: String },

    #[error("Text to replace was not found in core memory section '{section}'")]
    ReplaceTargetMissing { section: String },

    #[error("Message {0} was already evicted")]
    AlreadyEvicted(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn not_found_classification() {
        let missing_section = Error::Memory(MemoryError::SectionNotFound {
            agent_id: "a1".into(),
            section: "human".into(),
        });
        assert!(missing_section.is_not_found());
        assert!(missing_section.is_tool_recoverable());

        let missing_agent = Error::Memory(MemoryError::AgentNotFound("a1".into()));
        assert!(missing_agent.is_not_found());
        assert!(!missing_agent.is_tool_recoverable());
    }

    #[test]
    fn tool_errors_are_recoverable_transport_errors_are_not() {
        let unknown = Error::Tool(ToolError::UnknownTool("rm_rf".into()));
        assert!(unknown.is_tool_recoverable());
        assert!(unknown.to_string().contains("rm_rf"));

        let embed = Error::Embedding(EmbeddingError::EmptyResponse);
        assert!(!embed.is_tool_recoverable());
    }

    #[test]
    fn transient_provider_errors() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn embedding_errors_follow_their_cause() {
        let auth = EmbeddingError::from(ProviderError::AuthenticationFailed("bad key".into()));
        assert!(!auth.is_transient());
        let rate = EmbeddingError::from(ProviderError::RateLimited { retry_after_secs: 2 });
        assert!(rate.is_transient());
        assert!(EmbeddingError::Timeout(5).is_transient());
        assert!(!EmbeddingError::MalformedResponse("not json".into()).is_transient());
    }
}
