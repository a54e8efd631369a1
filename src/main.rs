use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use docnum::api::{start_server, AppState, ServerConfig};
use docnum::config::{AllocatorConfig, AppConfig, BackendConfig};
use docnum::contracts::{DocumentStore, SequenceRegistry};
use docnum::metrics::MetricsRegistry;
use docnum::numbering::{Allocator, DocumentTypeCatalog};
use docnum::storage::{MemoryStore, PostgresStore, RocksDbStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("docnum=info".parse()?))
        .init();

    tracing::info!("docnum starting...");

    let config = AppConfig::from_env()?;
    let server = ServerConfig::from_env()?;
    let catalog = Arc::new(DocumentTypeCatalog::with_extra(&config.extra_document_types)?);
    tracing::info!(
        document_types = catalog.len(),
        scope = ?config.allocator.scope,
        max_attempts = config.allocator.max_attempts,
        "Loaded document type catalog"
    );

    if let Some(warning) = config.backend.single_process_warning() {
        tracing::warn!("{}", warning);
    }

    match config.backend {
        BackendConfig::Postgres(pg) => {
            let store = Arc::new(PostgresStore::connect(&pg).await?);
            serve(store, catalog, config.allocator, server).await
        }
        BackendConfig::RocksDb(rocks) => {
            let store = Arc::new(RocksDbStore::open_with_config(&rocks)?);
            serve(store, catalog, config.allocator, server).await
        }
        BackendConfig::Memory => {
            serve(Arc::new(MemoryStore::new()), catalog, config.allocator, server).await
        }
    }
}

async fn serve<S>(
    store: Arc<S>,
    catalog: Arc<DocumentTypeCatalog>,
    allocator: AllocatorConfig,
    server: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SequenceRegistry + DocumentStore + 'static,
{
    let allocator = Allocator::new(Arc::clone(&store), store, catalog, allocator);
    let state = Arc::new(AppState::new(allocator, Arc::new(MetricsRegistry::new())));

    start_server(server, state, shutdown_signal()).await?;

    tracing::info!("docnum stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
