//! Token estimation utilities.
//!
//! The assembler counts through the [`Tokenizer`] trait so a real BPE
//! tokenizer can be injected. The default [`HeuristicTokenizer`] assumes
//! ~4 bytes per token, which is within ~10% for BPE tokenizers on English
//! text.

use memtier_core::message::Message;

/// Overhead charged per turn for role name and delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Overhead charged per tool call embedded in a turn.
pub const TOOL_CALL_OVERHEAD: usize = 4;

/// Counts the tokens of a piece of text.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// 1 token ≈ 4 bytes, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Tokens for one turn: overhead + content, plus overhead + name +
/// arguments for every tool call it carries.
pub fn estimate_message_tokens(tokenizer: &dyn Tokenizer, message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|tc| TOOL_CALL_OVERHEAD + tokenizer.count(&tc.name) + tokenizer.count(&tc.arguments))
        .sum();
    MESSAGE_OVERHEAD + tokenizer.count(&message.content) + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(tokenizer: &dyn Tokenizer, messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| estimate_message_tokens(tokenizer, m))
        .sum()
}
