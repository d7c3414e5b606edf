pub mod config;
pub mod documents;
pub mod error;
pub mod filter;
pub mod response;
pub mod schema;
pub mod store;
pub mod types;

use config::{Config, StoreBackend};
use error::StoreError;
use std::sync::Arc;
use store::{DocumentStore, DynamoStore, MemoryStore};

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Build the configured store and make sure it answers before serving
    pub async fn connect(config: &Config) -> Result<Arc<Self>, StoreError> {
        let store: Arc<dyn DocumentStore> = match config.store {
            StoreBackend::DynamoDb => Arc::new(DynamoStore::from_config(config).await),
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory document store; data is lost on exit");
                Arc::new(MemoryStore::new())
            }
        };

        store.ping().await?;
        Ok(Self::new(store))
    }
}
