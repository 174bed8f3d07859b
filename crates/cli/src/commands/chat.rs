//! `memtier chat`: interactive or single-message chat mode.

use memtier_agent::{AgentLoop, get_or_create_agent};
use memtier_config::AppConfig;
use memtier_core::error::Error;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    // Fail early with setup instructions when no key is set
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MEMTIER_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let store = super::open_store(&config).await?;
    let provider = memtier_providers::build_chat(&config)?;
    let embedder = memtier_providers::build_embedder(&config)?;
    let agent = get_or_create_agent(store.as_ref(), &config.agent).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling the current turn");
                cancel.cancel();
            }
        });
    }

    let agent_loop = AgentLoop::from_settings(
        agent.id.clone(),
        store,
        provider,
        embedder,
        &config.provider,
        &config.agent,
    )
    .with_cancellation(cancel.clone());

    if let Some(msg) = message {
        // Single message mode
        let reply = agent_loop.handle_message(&msg).await?;
        println!("{reply}");
        return Ok(());
    }

    println!();
    println!("  memtier: interactive mode");
    println!();
    println!("  Agent:     {} ({})", agent.name, agent.id);
    println!("  Model:     {}", config.provider.chat_model);
    println!("  Budget:    {} tokens", config.agent.max_context_tokens);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or 'quit' (or Ctrl+C) to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        match agent_loop.handle_message(input).await {
            Ok(reply) => {
                println!();
                for line in reply.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
