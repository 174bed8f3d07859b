//! Shared test helpers for agent tests.

use crate::context::ContextAssembler;
use memtier_core::embedding::{EmbeddingProvider, HashingEmbedder};
use memtier_core::error::{EmbeddingError, ProviderError};
use memtier_core::message::{Message, MessageToolCall};
use memtier_core::provider::{ChatProvider, ProviderRequest, ProviderResponse, Usage};
use std::sync::Mutex;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Once the script runs out every call fails.
pub struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A response carrying only text.
    pub fn text(text: &str) -> ProviderResponse {
        response(Message::assistant(text))
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };

        let responses = self.responses.lock().unwrap();
        responses
            .get(call)
            .cloned()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted at call #{call}"),
            })
    }
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message: Some(message),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "test-model".into(),
    }
}

/// An assistant turn with no text and the given tool calls.
pub fn tool_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    response(Message::assistant("").with_tool_calls(calls))
}

pub fn call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall::new(id, name, arguments)
}

/// What the prompt looked like when one text was embedded.
#[derive(Debug, Clone)]
pub struct Observation {
    pub text: String,
    pub active: usize,
    pub token_estimate: usize,
}

/// A hashing embedder that records its inputs and rejects empty text the
/// way hosted embedding endpoints do.
///
/// With a `view`, each call also snapshots the active window size and
/// prompt estimate as they stood just before the embed.
pub struct RecordingEmbedder {
    inner: HashingEmbedder,
    view: Option<ContextAssembler>,
    seen: Mutex<Vec<Observation>>,
}

impl RecordingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::default(),
            view: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn observing(view: ContextAssembler) -> Self {
        Self {
            view: Some(view),
            ..Self::new()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.observations().into_iter().map(|o| o.text).collect()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    fn name(&self) -> &str {
        "recording"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: "input must not be empty".into(),
            }
            .into());
        }

        let (active, token_estimate) = match &self.view {
            Some(view) => {
                let prompt = view.assemble().await.unwrap();
                (prompt.len() - 1, view.estimate_tokens(&prompt))
            }
            None => (0, 0),
        };
        self.seen.lock().unwrap().push(Observation {
            text: text.to_string(),
            active,
            token_estimate,
        });
        self.inner.embed(text).await
    }
}
