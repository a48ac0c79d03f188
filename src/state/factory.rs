use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{ChatStore, InMemoryStore, SledStore};
use std::sync::Arc;

/// Create a chat store based on configuration
pub fn create_store(config: &StateConfig) -> Result<Arc<dyn ChatStore>> {
    match config.backend {
        StateBackend::Memory => Ok(create_in_memory_store()),

        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            let store = SledStore::new(path)?;
            Ok(Arc::new(store))
        }
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn ChatStore> {
    tracing::info!("Initializing in-memory storage backend");
    Arc::new(InMemoryStore::new())
}
