//! Chat and embedding provider implementations for memtier.
//!
//! `OpenAiCompatProvider` speaks the OpenAI wire format for both chat and
//! embeddings. The guards in [`guard`] add timeouts and retry on top of any
//! provider, and the factories below build the guarded stack from config.

pub mod guard;
pub mod openai_compat;

pub use guard::{GuardedChat, GuardedEmbedder, RetryPolicy};
pub use openai_compat::OpenAiCompatProvider;

use memtier_config::{AppConfig, EmbeddingBackend};
use memtier_core::embedding::{EmbeddingProvider, HashingEmbedder};
use memtier_core::error::ProviderError;
use memtier_core::provider::ChatProvider;
use std::sync::Arc;
use tracing::info;

fn openai_from_config(config: &AppConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "No API key. Set MEMTIER_API_KEY or OPENAI_API_KEY, or api_key in config.toml".into(),
        )
    })?;

    Ok(OpenAiCompatProvider::new(
        "openai",
        &config.provider.base_url,
        api_key,
        config.timeouts.chat(),
    )?
    .with_embedding_model(
        &config.provider.embedding_model,
        config.provider.embedding_dimensions,
    ))
}

/// Build the guarded chat provider described by `config`.
pub fn build_chat(config: &AppConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let provider = openai_from_config(config)?;
    let policy = RetryPolicy::new(
        config.timeouts.chat(),
        config.timeouts.max_retries,
        config.timeouts.retry_backoff(),
    );
    info!(
        base_url = %config.provider.base_url,
        model = %config.provider.chat_model,
        "Chat provider ready"
    );
    Ok(Arc::new(GuardedChat::new(Arc::new(provider), policy)))
}

/// Build the embedding provider described by `config`.
///
/// The hashing backend runs locally and is returned unguarded.
pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    match config.provider.embedding_backend {
        EmbeddingBackend::Hashing => {
            info!(
                dimensions = config.provider.embedding_dimensions,
                "Using local hashing embedder"
            );
            Ok(Arc::new(HashingEmbedder::new(
                config.provider.embedding_dimensions,
            )))
        }
        EmbeddingBackend::Openai => {
            let provider = openai_from_config(config)?;
            let policy = RetryPolicy::new(
                config.timeouts.embedding(),
                config.timeouts.max_retries,
                config.timeouts.retry_backoff(),
            );
            info!(model = %config.provider.embedding_model, "Embedding provider ready");
            Ok(Arc::new(GuardedEmbedder::new(Arc::new(provider), policy)))
        }
    }
}
