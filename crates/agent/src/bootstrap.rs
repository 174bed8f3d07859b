//! Agent bootstrap: find the configured agent or create it.

use memtier_config::AgentSettings;
use memtier_core::agent::Agent;
use memtier_core::error::Result;
use memtier_core::memory::{CoreMemorySection, MemoryStore};
use tracing::info;

/// Load the agent named in `settings`, creating it on first use.
///
/// A new agent gets the configured persona and system prompt plus one core
/// memory section per seed. An existing agent is returned untouched, even
/// if the settings have changed since it was created.
pub async fn get_or_create_agent(
    store: &dyn MemoryStore,
    settings: &AgentSettings,
) -> Result<Agent> {
    if let Some(agent) = store.find_agent_by_name(&settings.name).await? {
        info!(agent_id = %agent.id, name = %agent.name, "Loaded existing agent");
        return Ok(agent);
    }

    let agent = Agent::new(&settings.name, &settings.persona, &settings.system_prompt);
    store.insert_agent(&agent).await?;
    for seed in &settings.initial_sections {
        store
            .insert_section(&CoreMemorySection::new(
                agent.id.clone(),
                &seed.name,
                &seed.content,
            ))
            .await?;
    }

    info!(
        agent_id = %agent.id,
        name = %agent.name,
        sections = settings.initial_sections.len(),
        "Created new agent"
    );
    Ok(agent)
}
