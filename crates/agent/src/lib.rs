//! The memtier agent: a tiered-memory conversational loop.
//!
//! The agent follows an **Assemble → Call → Act** cycle:
//!
//! 1. **Receive** a user message and persist it
//! 2. **Assemble context**: system prompt, persona, core memory and the
//!    active window, evicting old turns into recall memory when over budget
//! 3. **Send to LLM** with the memory tool catalogue
//! 4. **If tool calls**: execute them, persist results, loop back to step 2
//! 5. **If `send_message` or plain text**: return it as the reply
//!
//! The loop continues until a reply is produced or the max iteration limit
//! is reached.

pub mod bootstrap;
pub mod context;
pub mod loop_runner;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bootstrap::get_or_create_agent;
pub use context::{AssembledContext, ContextAssembler, HeuristicTokenizer, Tokenizer};
pub use loop_runner::{AgentLoop, FALLBACK_REPLY, Termination, TurnReport};
pub use tools::{ToolDispatcher, ToolKind};
