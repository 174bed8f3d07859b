//! The memory tool catalogue and its dispatcher.
//!
//! The catalogue is closed: every tool the model may call is a
//! [`ToolKind`] variant with a typed argument struct. Extra fields in the
//! model's arguments are ignored; missing or mistyped ones are rejected.

use memtier_core::error::{Result, ToolError};
use memtier_core::provider::ToolDefinition;
use memtier_memory::{ArchivalStore, CoreMemory, RecallStore};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Every tool the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SendMessage,
    CoreMemoryAppend,
    CoreMemoryReplace,
    ConversationSearch,
    ArchivalMemoryInsert,
    ArchivalMemorySearch,
}

impl ToolKind {
    /// Catalogue order, as advertised to the model.
    pub const ALL: [ToolKind; 6] = [
        ToolKind::SendMessage,
        ToolKind::CoreMemoryAppend,
        ToolKind::CoreMemoryReplace,
        ToolKind::ConversationSearch,
        ToolKind::ArchivalMemoryInsert,
        ToolKind::ArchivalMemorySearch,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SendMessage => "send_message",
            ToolKind::CoreMemoryAppend => "core_memory_append",
            ToolKind::CoreMemoryReplace => "core_memory_replace",
            ToolKind::ConversationSearch => "conversation_search",
            ToolKind::ArchivalMemoryInsert => "archival_memory_insert",
            ToolKind::ArchivalMemorySearch => "archival_memory_search",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::SendMessage => "Send a message to the user",
            ToolKind::CoreMemoryAppend => "Append content to a section of core memory",
            ToolKind::CoreMemoryReplace => "Replace content in a section of core memory",
            ToolKind::ConversationSearch => {
                "Search past conversation messages that are no longer in context"
            }
            ToolKind::ArchivalMemoryInsert => "Store content in long-term archival memory",
            ToolKind::ArchivalMemorySearch => "Search long-term archival memory",
        }
    }

    /// JSON Schema of the arguments. Every field is a required string.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let fields: &[(&str, &str)] = match self {
            ToolKind::SendMessage => &[("message", "The message to send to the user")],
            ToolKind::CoreMemoryAppend => &[
                ("section", "The section to append to, e.g. 'human' or 'persona'"),
                ("content", "The content to append"),
            ],
            ToolKind::CoreMemoryReplace => &[
                ("section", "The section to edit"),
                ("old_content", "The text to find"),
                ("new_content", "The text to replace it with"),
            ],
            ToolKind::ConversationSearch | ToolKind::ArchivalMemorySearch => {
                &[("query", "The search query")]
            }
            ToolKind::ArchivalMemoryInsert => &[("content", "The content to store")],
        };

        let properties: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(name, description)| {
                (
                    name.to_string(),
                    serde_json::json!({ "type": "string", "description": description }),
                )
            })
            .collect();
        let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CoreMemoryAppendArgs {
    section: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CoreMemoryReplaceArgs {
    section: String,
    old_content: String,
    new_content: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct ArchivalInsertArgs {
    content: String,
}

fn parse_args<T: DeserializeOwned>(
    kind: ToolKind,
    raw: &str,
) -> std::result::Result<T, ToolError> {
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: kind.name().to_string(),
        reason: e.to_string(),
    })
}

/// Executes one tool call against the memory tiers of an agent.
pub struct ToolDispatcher {
    core: CoreMemory,
    recall: RecallStore,
    archival: ArchivalStore,
    search_limit: usize,
}

impl ToolDispatcher {
    pub fn new(core: CoreMemory, recall: RecallStore, archival: ArchivalStore) -> Self {
        Self {
            core,
            recall,
            archival,
            search_limit: 10,
        }
    }

    /// Maximum hits returned by the search tools.
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// The catalogue as sent with every chat request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL.iter().map(ToolKind::to_definition).collect()
    }

    /// Validate and run one call. Returns the text recorded as its result.
    pub async fn execute(&self, name: &str, raw_arguments: &str) -> Result<String> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        debug!(tool = name, "Executing tool");

        match kind {
            ToolKind::SendMessage => {
                let args: SendMessageArgs = parse_args(kind, raw_arguments)?;
                Ok(args.message)
            }
            ToolKind::CoreMemoryAppend => {
                let args: CoreMemoryAppendArgs = parse_args(kind, raw_arguments)?;
                self.core.append(&args.section, &args.content).await?;
                Ok(format!("OK. Core memory section '{}' updated.", args.section))
            }
            ToolKind::CoreMemoryReplace => {
                let args: CoreMemoryReplaceArgs = parse_args(kind, raw_arguments)?;
                self.core
                    .replace(&args.section, &args.old_content, &args.new_content)
                    .await?;
                Ok(format!("OK. Core memory section '{}' updated.", args.section))
            }
            ToolKind::ConversationSearch => {
                let args: QueryArgs = parse_args(kind, raw_arguments)?;
                let hits = self.recall.search(&args.query, self.search_limit).await?;
                Ok(serde_json::to_string(&hits)?)
            }
            ToolKind::ArchivalMemoryInsert => {
                let args: ArchivalInsertArgs = parse_args(kind, raw_arguments)?;
                self.archival.insert(&args.content).await?;
                Ok("OK. Content saved to archival memory.".to_string())
            }
            ToolKind::ArchivalMemorySearch => {
                let args: QueryArgs = parse_args(kind, raw_arguments)?;
                let hits = self.archival.search(&args.query, self.search_limit).await?;
                Ok(serde_json::to_string(&hits)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtier_core::agent::Agent;
    use memtier_core::embedding::HashingEmbedder;
    use memtier_core::error::{Error, MemoryError};
    use memtier_core::memory::{CoreMemorySection, MemoryStore, ReplaceMode};
    use memtier_core::message::Message;
    use memtier_memory::InMemoryStore;
    use std::sync::Arc;

    async fn setup(mode: ReplaceMode) -> (ToolDispatcher, Arc<InMemoryStore>, Agent) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashingEmbedder::default());
        let agent = Agent::new("sam", "p", "s");
        store.insert_agent(&agent).await.unwrap();
        store
            .insert_section(&CoreMemorySection::new(agent.id.clone(), "human", ""))
            .await
            .unwrap();

        let dispatcher = ToolDispatcher::new(
            CoreMemory::new(agent.id.clone(), store.clone()).with_replace_mode(mode),
            RecallStore::new(agent.id.clone(), store.clone(), embedder.clone()),
            ArchivalStore::new(agent.id.clone(), store.clone(), embedder),
        );
        (dispatcher, store, agent)
    }

    async fn human(store: &InMemoryStore, agent: &Agent) -> String {
        store
            .get_section(&agent.id, "human")
            .await
            .unwrap()
            .unwrap()
            .content
    }

    #[test]
    fn catalogue_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("shell"), None);
    }

    #[test]
    fn schemas_require_every_field() {
        let schema = ToolKind::CoreMemoryReplace.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(
            schema["required"],
            serde_json::json!(["section", "old_content", "new_content"])
        );
        assert_eq!(schema["properties"]["old_content"]["type"], "string");
    }

    #[tokio::test]
    async fn definitions_in_catalogue_order() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let names: Vec<String> = dispatcher.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "send_message",
                "core_memory_append",
                "core_memory_replace",
                "conversation_search",
                "archival_memory_insert",
                "archival_memory_search",
            ]
        );
    }

    #[tokio::test]
    async fn send_message_returns_text_without_side_effects() {
        let (dispatcher, store, agent) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute("send_message", r#"{"message":"Hello Dana!"}"#)
            .await
            .unwrap();
        assert_eq!(out, "Hello Dana!");
        assert_eq!(store.count_messages(&agent.id).await.unwrap().active, 0);
        assert_eq!(store.count_archival(&agent.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn core_memory_append_confirms() {
        let (dispatcher, store, agent) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute(
                "core_memory_append",
                r#"{"section":"human","content":"Name: Dana"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out, "OK. Core memory section 'human' updated.");
        assert_eq!(human(&store, &agent).await, "Name: Dana");
    }

    #[tokio::test]
    async fn lenient_replace_of_absent_text_still_confirms() {
        let (dispatcher, store, agent) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute(
                "core_memory_replace",
                r#"{"section":"human","old_content":"Bob","new_content":"Rob"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out, "OK. Core memory section 'human' updated.");
        assert_eq!(human(&store, &agent).await, "");
    }

    #[tokio::test]
    async fn strict_replace_of_absent_text_fails() {
        let (dispatcher, _, _) = setup(ReplaceMode::Strict).await;
        let err = dispatcher
            .execute(
                "core_memory_replace",
                r#"{"section":"human","old_content":"Bob","new_content":"Rob"}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Memory(MemoryError::ReplaceTargetMissing { .. })
        ));
        assert!(err.is_tool_recoverable());
    }

    #[tokio::test]
    async fn archival_insert_then_search() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute(
                "archival_memory_insert",
                r#"{"content":"Dana's sister lives in Lisbon"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out, "OK. Content saved to archival memory.");

        let out = dispatcher
            .execute(
                "archival_memory_search",
                r#"{"query":"Dana's sister lives in Lisbon"}"#,
            )
            .await
            .unwrap();
        let hits: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(hits[0]["content"], "Dana's sister lives in Lisbon");
        assert!(hits[0]["similarity"].as_f64().unwrap() > 0.9);
    }

    #[tokio::test]
    async fn conversation_search_returns_json_array() {
        let (dispatcher, store, agent) = setup(ReplaceMode::Lenient).await;
        let turn = store
            .append_message(&agent.id, Message::user("I was born in Porto"))
            .await
            .unwrap();
        let embedding = HashingEmbedder::default().embed_sync("I was born in Porto");
        store.evict(turn, embedding).await.unwrap();

        let out = dispatcher
            .execute("conversation_search", r#"{"query":"born in Porto"}"#)
            .await
            .unwrap();
        let hits: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(hits.is_array());
        assert_eq!(hits[0]["content"], "I was born in Porto");
        assert_eq!(hits[0]["role"], "user");
    }

    #[tokio::test]
    async fn empty_search_is_empty_array() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute("conversation_search", r#"{"query":"anything"}"#)
            .await
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn unknown_tool_rejected() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let err = dispatcher.execute("shell", "{}").await.unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::UnknownTool(ref n)) if n == "shell"));
    }

    #[tokio::test]
    async fn malformed_and_mistyped_arguments_rejected() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        for raw in ["not json", r#"{"msg":"hi"}"#, r#"{"message":42}"#] {
            let err = dispatcher.execute("send_message", raw).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Tool(ToolError::InvalidArguments { ref tool, .. })
                        if tool == "send_message"
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn extra_fields_are_ignored() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let out = dispatcher
            .execute("send_message", r#"{"message":"hi","mood":"cheerful"}"#)
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn append_to_missing_section_is_not_found() {
        let (dispatcher, _, _) = setup(ReplaceMode::Lenient).await;
        let err = dispatcher
            .execute("core_memory_append", r#"{"section":"goals","content":"x"}"#)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.is_tool_recoverable());
    }
}
