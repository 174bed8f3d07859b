//! # memtier core
//!
//! Domain types, collaborator traits, and error definitions for the memtier
//! tiered-memory agent. This crate has no storage or network dependencies;
//! it defines the model that all other crates implement against.
//!
//! Every collaborator is a trait here: the chat provider, the embedding
//! provider and the persistence adapter. Implementations live in their own
//! crates, so components receive them by injection and tests can swap in
//! deterministic stand-ins.

pub mod agent;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentId, ToolErrorPolicy};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{EmbeddingError, Error, MemoryError, ProviderError, Result, ToolError};
pub use memory::{
    ArchivalRecord, CoreMemorySection, MemoryStore, MessageCounts, ReplaceMode, Scored,
};
pub use message::{ActiveTurn, Message, MessageToolCall, RecalledTurn, Role};
pub use provider::{ChatProvider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
