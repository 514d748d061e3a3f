use crate::config::{ServerConfig, StoreConfig};
use crate::metrics::Metrics;
use crate::presence::PresenceCoordinator;
use crate::registry::ConnectionRegistry;
use courier_storage::{connect, MemoryRepository, Repository, StorageError};
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub config: ServerConfig,
    pub repository: Arc<dyn Repository>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceCoordinator,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Builds the shared server state, connecting and migrating the
    /// configured storage backend.
    pub async fn init(config: ServerConfig) -> Result<Arc<AppState>, StorageError> {
        let repository: Arc<dyn Repository> = match &config.store {
            StoreConfig::Memory => {
                info!("using in-memory repository");
                Arc::new(MemoryRepository::new())
            }
            StoreConfig::Postgres { dsn } => {
                let repository = connect(dsn).await?;
                repository.migrate().await?;
                info!("using postgres repository");
                Arc::new(repository)
            }
        };
        Ok(Self::assemble(config, repository))
    }

    pub fn assemble(config: ServerConfig, repository: Arc<dyn Repository>) -> Arc<AppState> {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let presence = PresenceCoordinator::new(
            Arc::clone(&repository),
            Arc::clone(&registry),
            Arc::clone(&metrics),
        );
        Arc::new(AppState {
            config,
            repository,
            registry,
            presence,
            metrics,
        })
    }
}

#[cfg(test)]
pub fn test_state(repository: Arc<dyn Repository>) -> Arc<AppState> {
    AppState::assemble(
        ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            http_bind: "127.0.0.1:0".to_string(),
            store: StoreConfig::Memory,
            outbound_buffer: 16,
        },
        repository,
    )
}
