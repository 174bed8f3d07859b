//! Memory tiers for memtier.
//!
//! Storage backends implement [`memtier_core::MemoryStore`]; the tier
//! components wrap a store (and, where similarity is involved, an embedding
//! provider) for one agent.

pub mod archival;
pub mod core_memory;
pub mod in_memory;
pub mod recall;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use archival::{ArchivalHit, ArchivalStore};
pub use core_memory::{CoreMemory, ReplaceOutcome};
pub use in_memory::InMemoryStore;
pub use recall::{RecallHit, RecallStore};
pub use vector::cosine_similarity;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
