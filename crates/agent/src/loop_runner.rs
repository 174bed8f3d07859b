//! The agent control loop.
//!
//! One user message drives one turn:
//!
//! 1. Persist the user message into the active window
//! 2. Assemble the prompt, evicting old turns to stay within budget
//! 3. Call the model with the tool catalogue and persist its turn
//! 4. Execute tool calls in order, persisting each result
//! 5. Stop once `send_message` produced a reply, the model answered with
//!    plain text, or the iteration ceiling was hit
//!
//! Nothing persisted is rolled back when a turn aborts.

use crate::context::assembler::ContextAssembler;
use crate::context::token::{HeuristicTokenizer, Tokenizer};
use crate::tools::{ToolDispatcher, ToolKind};
use memtier_config::{AgentSettings, ProviderSettings};
use memtier_core::agent::{AgentId, ToolErrorPolicy};
use memtier_core::embedding::EmbeddingProvider;
use memtier_core::error::{Error, ProviderError, Result};
use memtier_core::memory::{MemoryStore, ReplaceMode};
use memtier_core::message::{Message, MessageToolCall};
use memtier_core::provider::{ChatProvider, ProviderRequest};
use memtier_memory::{ArchivalStore, CoreMemory, RecallStore};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reply used when a turn ends without anything to say.
pub const FALLBACK_REPLY: &str = "No response generated.";

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A `send_message` call produced the reply.
    SentMessage,
    /// The model answered without calling any tool.
    PlainReply,
    /// The provider returned no assistant turn.
    NoAssistantTurn,
    /// The iteration ceiling was reached.
    IterationLimit,
}

/// Outcome of one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub reply: String,
    /// Model calls made during the turn
    pub iterations: usize,
    pub termination: Termination,
}

/// Drives conversation turns for one agent.
pub struct AgentLoop {
    agent_id: AgentId,

    /// Backs every memory tier
    store: Arc<dyn MemoryStore>,

    /// The LLM provider to use
    provider: Arc<dyn ChatProvider>,

    /// Embeds evicted turns and search queries
    embedder: Arc<dyn EmbeddingProvider>,

    tokenizer: Arc<dyn Tokenizer>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Token budget of the assembled prompt
    context_budget: usize,

    /// Maximum model calls per turn
    max_iterations: usize,

    /// Maximum hits returned by the search tools
    search_limit: usize,

    replace_mode: ReplaceMode,
    tool_error_policy: ToolErrorPolicy,
    cancel: CancellationToken,
}

impl AgentLoop {
    /// Create a loop with default limits.
    pub fn new(
        agent_id: AgentId,
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            store,
            provider,
            embedder,
            tokenizer: Arc::new(HeuristicTokenizer),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            context_budget: 8000,
            max_iterations: 10,
            search_limit: 10,
            replace_mode: ReplaceMode::default(),
            tool_error_policy: ToolErrorPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a loop configured from the provider and agent settings.
    pub fn from_settings(
        agent_id: AgentId,
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        provider_settings: &ProviderSettings,
        agent_settings: &AgentSettings,
    ) -> Self {
        let mut agent_loop = Self::new(
            agent_id,
            store,
            provider,
            embedder,
            &provider_settings.chat_model,
        )
        .with_temperature(provider_settings.temperature)
        .with_context_budget(agent_settings.max_context_tokens)
        .with_max_iterations(agent_settings.max_iterations)
        .with_search_limit(agent_settings.search_limit)
        .with_replace_mode(agent_settings.replace_mode)
        .with_tool_error_policy(agent_settings.tool_error_policy);
        agent_loop.max_tokens = provider_settings.max_tokens;
        agent_loop
    }

    /// Set the maximum number of model calls per turn.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget;
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn with_replace_mode(mut self, mode: ReplaceMode) -> Self {
        self.replace_mode = mode;
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Abort in-flight turns with [`Error::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Handle one user message and return the reply text.
    pub async fn handle_message(&self, text: &str) -> Result<String> {
        self.run_turn(text).await.map(|report| report.reply)
    }

    /// Handle one user message and report how the turn ended.
    pub async fn run_turn(&self, text: &str) -> Result<TurnReport> {
        info!(agent_id = %self.agent_id, "Handling user message");

        self.cancellable(async {
            self.store
                .append_message(&self.agent_id, Message::user(text))
                .await
                .map_err(Error::from)
        })
        .await?;

        let assembler = self.assembler();
        let tools = self.dispatcher();
        let definitions = tools.definitions();

        for iteration in 1..=self.max_iterations {
            debug!(agent_id = %self.agent_id, iteration, "Agent loop iteration");

            let context = self.cancellable(assembler.evict_and_assemble()).await?;
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: context.messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
            };

            let response = self
                .cancellable(async { self.provider.complete(request).await.map_err(Error::from) })
                .await?;
            if let Some(usage) = &response.usage {
                debug!(
                    agent_id = %self.agent_id,
                    iteration,
                    model = %response.model,
                    tokens = usage.total_tokens,
                    "Model responded"
                );
            }

            let Some(assistant) = response.message else {
                warn!(agent_id = %self.agent_id, iteration, "Provider returned no assistant turn");
                return Ok(TurnReport {
                    reply: FALLBACK_REPLY.to_string(),
                    iterations: iteration,
                    termination: Termination::NoAssistantTurn,
                });
            };

            let calls = assistant.tool_calls.clone();
            let content = assistant.content.clone();
            self.cancellable(async {
                self.store
                    .append_message(&self.agent_id, assistant)
                    .await
                    .map_err(Error::from)
            })
            .await?;

            if calls.is_empty() {
                let reply = if content.is_empty() {
                    FALLBACK_REPLY.to_string()
                } else {
                    content
                };
                info!(agent_id = %self.agent_id, iteration, "Model replied without tools");
                return Ok(TurnReport {
                    reply,
                    iterations: iteration,
                    termination: Termination::PlainReply,
                });
            }

            validate_call_ids(&calls)?;

            // The last non-empty send_message wins. A later empty one does
            // not clear an earlier reply, so the turn still ends here.
            let mut reply = None;
            for call in &calls {
                if let Some(text) = self.execute_call(&tools, call).await? {
                    reply = Some(text);
                }
            }

            if let Some(reply) = reply {
                info!(agent_id = %self.agent_id, iteration, "Reply sent");
                return Ok(TurnReport {
                    reply,
                    iterations: iteration,
                    termination: Termination::SentMessage,
                });
            }
        }

        warn!(
            agent_id = %self.agent_id,
            iterations = self.max_iterations,
            "Max iterations reached without a reply"
        );
        Ok(TurnReport {
            reply: FALLBACK_REPLY.to_string(),
            iterations: self.max_iterations,
            termination: Termination::IterationLimit,
        })
    }

    /// Run one call and persist its result.
    ///
    /// Returns the reply text when the call was a successful, non-empty
    /// `send_message`.
    async fn execute_call(
        &self,
        tools: &ToolDispatcher,
        call: &MessageToolCall,
    ) -> Result<Option<String>> {
        let outcome = self
            .cancellable(tools.execute(&call.name, &call.arguments))
            .await;

        let (result, reply) = match outcome {
            Ok(output) => {
                debug!(agent_id = %self.agent_id, tool = %call.name, "Tool executed");
                let reply = (ToolKind::from_name(&call.name) == Some(ToolKind::SendMessage)
                    && !output.is_empty())
                .then(|| output.clone());
                (output, reply)
            }
            Err(e)
                if self.tool_error_policy == ToolErrorPolicy::Record
                    && e.is_tool_recoverable() =>
            {
                warn!(agent_id = %self.agent_id, tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {e}"), None)
            }
            Err(e) => return Err(e),
        };

        self.cancellable(async {
            self.store
                .append_message(
                    &self.agent_id,
                    Message::tool_result(&call.id, &call.name, result),
                )
                .await
                .map_err(Error::from)
        })
        .await?;

        Ok(reply)
    }

    fn assembler(&self) -> ContextAssembler {
        ContextAssembler::new(
            self.agent_id.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.context_budget,
        )
        .with_tokenizer(self.tokenizer.clone())
    }

    fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::new(
            CoreMemory::new(self.agent_id.clone(), self.store.clone())
                .with_replace_mode(self.replace_mode),
            RecallStore::new(
                self.agent_id.clone(),
                self.store.clone(),
                self.embedder.clone(),
            ),
            ArchivalStore::new(
                self.agent_id.clone(),
                self.store.clone(),
                self.embedder.clone(),
            ),
        )
        .with_search_limit(self.search_limit)
    }

    /// Await `fut` unless the cancellation token fires first.
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(agent_id = %self.agent_id, "Turn cancelled");
                Err(Error::Cancelled)
            }
            result = fut => result,
        }
    }
}

/// Call ids must be non-empty and unique within one assistant turn.
fn validate_call_ids(calls: &[MessageToolCall]) -> Result<()> {
    let mut seen = HashSet::new();
    for call in calls {
        if call.id.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "tool call '{}' has an empty id",
                call.name
            ))
            .into());
        }
        if !seen.insert(call.id.as_str()) {
            return Err(ProviderError::MalformedResponse(format!(
                "duplicate tool call id '{}'",
                call.id
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingEmbedder, ScriptedProvider, call, tool_response};
    use memtier_core::agent::Agent;
    use memtier_core::embedding::HashingEmbedder;
    use memtier_core::error::MemoryError;
    use memtier_core::memory::CoreMemorySection;
    use memtier_core::message::Role;
    use memtier_core::provider::ProviderResponse;
    use memtier_memory::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        agent: Agent,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let agent = Agent::new("sam", "I am Sam.", "You are MemGPT.");
            store.insert_agent(&agent).await.unwrap();
            for name in ["human", "persona"] {
                store
                    .insert_section(&CoreMemorySection::new(agent.id.clone(), name, ""))
                    .await
                    .unwrap();
            }
            Self { store, agent }
        }

        fn agent_loop(&self, provider: Arc<ScriptedProvider>) -> AgentLoop {
            AgentLoop::new(
                self.agent.id.clone(),
                self.store.clone(),
                provider,
                Arc::new(HashingEmbedder::default()),
                "test-model",
            )
        }

        async fn active(&self) -> Vec<Message> {
            self.store
                .active_messages(&self.agent.id)
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.message)
                .collect()
        }
    }

    #[tokio::test]
    async fn send_message_ends_turn() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![call(
            "c1",
            "send_message",
            r#"{"message":"Hello Dana!"}"#,
        )])]));

        let report = fx.agent_loop(provider.clone()).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "Hello Dana!");
        assert_eq!(report.iterations, 1);
        assert_eq!(report.termination, Termination::SentMessage);
        assert_eq!(provider.call_count(), 1);

        let active = fx.active().await;
        let roles: Vec<Role> = active.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(active[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(active[2].name.as_deref(), Some("send_message"));
    }

    #[tokio::test]
    async fn request_carries_catalogue_and_preamble() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text("ok")]));
        fx.agent_loop(provider.clone()).handle_message("Hi").await.unwrap();

        let request = provider.last_request().unwrap();
        assert_eq!(request.model, "test-model");
        assert_eq!(request.tools.len(), ToolKind::ALL.len());
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.starts_with("You are MemGPT."));
        assert_eq!(request.messages.last().unwrap().content, "Hi");
    }

    #[tokio::test]
    async fn plain_text_is_the_reply() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text(
            "Just text",
        )]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "Just text");
        assert_eq!(report.termination, Termination::PlainReply);
    }

    #[tokio::test]
    async fn empty_plain_text_falls_back() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text("")]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, FALLBACK_REPLY);
        assert_eq!(report.termination, Termination::PlainReply);
    }

    #[tokio::test]
    async fn missing_assistant_turn_falls_back() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse {
            message: None,
            usage: None,
            model: "test-model".into(),
        }]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, FALLBACK_REPLY);
        assert_eq!(report.termination, Termination::NoAssistantTurn);
        assert_eq!(fx.active().await.len(), 1);
    }

    #[tokio::test]
    async fn memory_edit_then_reply() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call(
                "c1",
                "core_memory_append",
                r#"{"section":"human","content":"Name: Dana"}"#,
            )]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"Got it."}"#)]),
        ]));

        let report = fx
            .agent_loop(provider.clone())
            .run_turn("My name is Dana")
            .await
            .unwrap();
        assert_eq!(report.reply, "Got it.");
        assert_eq!(report.iterations, 2);

        // The second request already sees the edited core memory.
        let request = provider.last_request().unwrap();
        assert!(request.messages[0].content.contains("<human>Name: Dana</human>"));

        let tool_results: Vec<String> = fx
            .active()
            .await
            .into_iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content)
            .collect();
        assert_eq!(
            tool_results,
            vec!["OK. Core memory section 'human' updated.", "Got it."]
        );
    }

    #[tokio::test]
    async fn calls_in_one_turn_run_in_order() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![
            call("c1", "core_memory_append", r#"{"section":"human","content":"A"}"#),
            call("c2", "core_memory_append", r#"{"section":"human","content":"B"}"#),
            call("c3", "send_message", r#"{"message":"done"}"#),
        ])]));
        let report = fx.agent_loop(provider).run_turn("go").await.unwrap();
        assert_eq!(report.reply, "done");

        let section = fx
            .store
            .get_section(&fx.agent.id, "human")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(section.content, "AB");

        let ids: Vec<String> = fx
            .active()
            .await
            .into_iter()
            .filter_map(|m| m.tool_call_id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn iteration_ceiling_falls_back() {
        let fx = Fixture::new().await;
        let responses = (0..10)
            .map(|i| {
                tool_response(vec![call(
                    &format!("c{i}"),
                    "archival_memory_insert",
                    r#"{"content":"note"}"#,
                )])
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));

        let report = fx.agent_loop(provider.clone()).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, FALLBACK_REPLY);
        assert_eq!(report.iterations, 10);
        assert_eq!(report.termination, Termination::IterationLimit);
        assert_eq!(provider.call_count(), 10);
        assert_eq!(fx.store.count_archival(&fx.agent.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn custom_ceiling_is_honoured() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("c1", "conversation_search", r#"{"query":"x"}"#)]),
            tool_response(vec![call("c2", "conversation_search", r#"{"query":"y"}"#)]),
        ]));
        let report = fx
            .agent_loop(provider.clone())
            .with_max_iterations(2)
            .run_turn("Hi")
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::IterationLimit);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_send_message_keeps_looping() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("c1", "send_message", r#"{"message":""}"#)]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"second"}"#)]),
        ]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "second");
        assert_eq!(report.iterations, 2);
    }

    #[tokio::test]
    async fn later_empty_send_message_keeps_earlier_reply() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![
            call("c1", "send_message", r#"{"message":"a"}"#),
            call("c2", "send_message", r#"{"message":""}"#),
        ])]));
        let report = fx.agent_loop(provider.clone()).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "a");
        assert_eq!(report.termination, Termination::SentMessage);
        assert_eq!(report.iterations, 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_turns_do_not_wedge_later_turns() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedProvider::text(""),
            tool_response(vec![call("c1", "send_message", r#"{"message":""}"#)]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"ok"}"#)]),
        ]));
        let agent_loop = AgentLoop::new(
            fx.agent.id.clone(),
            fx.store.clone(),
            provider,
            Arc::new(RecordingEmbedder::new()),
            "test-model",
        );

        assert_eq!(agent_loop.handle_message("hi").await.unwrap(), FALLBACK_REPLY);
        let agent_loop = agent_loop.with_context_budget(120);
        let reply = agent_loop
            .handle_message(&format!("long {}", "z".repeat(400)))
            .await
            .unwrap();
        assert_eq!(reply, "ok");

        let counts = fx.store.count_messages(&fx.agent.id).await.unwrap();
        assert!(counts.recalled >= 2);
    }

    #[tokio::test]
    async fn recoverable_tool_error_is_recorded() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("c1", "shell", "{}")]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"sorry"}"#)]),
        ]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "sorry");

        let first_result = fx
            .active()
            .await
            .into_iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(first_result.content.starts_with("Error: "));
        assert!(first_result.content.contains("shell"));
    }

    #[tokio::test]
    async fn abort_policy_surfaces_tool_error() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![call(
            "c1",
            "core_memory_append",
            r#"{"section":"goals","content":"x"}"#,
        )])]));
        let err = fx
            .agent_loop(provider)
            .with_tool_error_policy(ToolErrorPolicy::Abort)
            .run_turn("Hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Memory(MemoryError::SectionNotFound { .. })
        ));

        // User and assistant turns stay persisted.
        assert_eq!(fx.active().await.len(), 2);
    }

    #[tokio::test]
    async fn strict_replace_miss_is_recorded_under_record_policy() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call(
                "c1",
                "core_memory_replace",
                r#"{"section":"human","old_content":"Bob","new_content":"Rob"}"#,
            )]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"ok"}"#)]),
        ]));
        fx.agent_loop(provider)
            .with_replace_mode(ReplaceMode::Strict)
            .run_turn("Hi")
            .await
            .unwrap();
        let result = fx
            .active()
            .await
            .into_iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(result.content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn invalid_arguments_are_recoverable() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("c1", "send_message", "not json")]),
            tool_response(vec![call("c2", "send_message", r#"{"message":"fixed"}"#)]),
        ]));
        let report = fx.agent_loop(provider).run_turn("Hi").await.unwrap();
        assert_eq!(report.reply, "fixed");
    }

    #[tokio::test]
    async fn duplicate_call_ids_are_rejected() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![
            call("dup", "send_message", r#"{"message":"a"}"#),
            call("dup", "send_message", r#"{"message":"b"}"#),
        ])]));
        let err = fx.agent_loop(provider).run_turn("Hi").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn empty_call_id_is_rejected() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![tool_response(vec![call(
            "",
            "send_message",
            r#"{"message":"a"}"#,
        )])]));
        let err = fx.agent_loop(provider).run_turn("Hi").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn provider_failure_aborts_turn() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let err = fx.agent_loop(provider).run_turn("Hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(fx.active().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_agent_aborts_turn() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text("x")]));
        let agent_loop = AgentLoop::new(
            AgentId::from("ghost"),
            fx.store.clone(),
            provider,
            Arc::new(HashingEmbedder::default()),
            "test-model",
        );
        let err = agent_loop.run_turn("Hi").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_work() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text("x")]));
        let token = CancellationToken::new();
        token.cancel();

        let err = fx
            .agent_loop(provider.clone())
            .with_cancellation(token)
            .run_turn("Hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn small_budget_evicts_into_recall() {
        let fx = Fixture::new().await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("c1", "send_message", r#"{"message":"one"}"#)]),
            tool_response(vec![call(
                "c2",
                "conversation_search",
                r#"{"query":"my favourite colour is teal"}"#,
            )]),
            tool_response(vec![call("c3", "send_message", r#"{"message":"two"}"#)]),
        ]));
        let agent_loop = fx.agent_loop(provider).with_context_budget(150);

        agent_loop
            .handle_message("my favourite colour is teal")
            .await
            .unwrap();
        agent_loop
            .handle_message(&format!("now something long {}", "z".repeat(400)))
            .await
            .unwrap();

        let counts = fx.store.count_messages(&fx.agent.id).await.unwrap();
        assert!(counts.recalled > 0);

        let search_result = fx
            .active()
            .await
            .into_iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c2"))
            .unwrap();
        assert!(search_result.content.contains("my favourite colour is teal"));
    }

    #[test]
    fn call_id_validation() {
        assert!(validate_call_ids(&[call("a", "x", "{}"), call("b", "x", "{}")]).is_ok());
        assert!(validate_call_ids(&[]).is_ok());
        let err = validate_call_ids(&[call("", "x", "{}")]).unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::MalformedResponse(_))
        ));
    }
}
