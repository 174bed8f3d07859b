//! Subcommand implementations.

pub mod chat;
pub mod init;
pub mod memory;

use memtier_config::{AppConfig, StorageBackend};
use memtier_core::memory::MemoryStore;
use memtier_memory::{InMemoryStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;

/// Open the store selected by `config.memory.backend`.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn MemoryStore>, Box<dyn std::error::Error>> {
    match config.memory.backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::Sqlite => {
            let path = &config.memory.database_path;
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::new(path, config.timeouts.storage()).await?;
            Ok(Arc::new(store))
        }
    }
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
