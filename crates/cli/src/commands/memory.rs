//! `memtier memory`: show the agent's core memory and tier sizes.

use memtier_config::StorageBackend;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    if config.memory.backend == StorageBackend::InMemory {
        println!("  The in-memory backend keeps nothing between runs.");
        return Ok(());
    }

    let store = super::open_store(&config).await?;
    let Some(agent) = store.find_agent_by_name(&config.agent.name).await? else {
        println!(
            "  No agent named '{}' yet. Start one with: memtier chat",
            config.agent.name
        );
        return Ok(());
    };

    let sections = store.list_sections(&agent.id).await?;
    let messages = store.count_messages(&agent.id).await?;
    let archival = store.count_archival(&agent.id).await?;

    println!("Memory for agent '{}' ({})", agent.name, agent.id);
    println!("======================================");
    println!("  Database:   {}", config.memory.database_path);
    println!("  Active:     {} messages", messages.active);
    println!("  Recalled:   {} messages", messages.recalled);
    println!("  Archival:   {} records", archival);
    println!();
    println!("Core memory");
    println!("-----------");
    for section in &sections {
        println!("  [{}]", section.section);
        if section.content.is_empty() {
            println!("    (empty)");
        }
        for line in section.content.lines() {
            println!("    {line}");
        }
    }

    Ok(())
}
