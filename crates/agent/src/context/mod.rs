//! Prompt assembly under a token budget.
//!
//! Every model call sees one system turn (system prompt, persona and core
//! memory) followed by the active window. Turns that do not fit are moved
//! to the recall index, oldest first.

pub mod assembler;
pub mod token;

pub use assembler::{AssembledContext, ContextAssembler, render_preamble};
pub use token::{HeuristicTokenizer, Tokenizer, estimate_tokens};
