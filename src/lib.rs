pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{ApiError, ApiResult};

// Export logic types
pub use logic::{
    AssociationResolver, CriteriaParser, RequestContext, ResourceService, ResponseBuilder,
    ResponseEnvelope, UpdateOutcome,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, Page, PostgresStore, ResourceStore};

use anyhow::Context;
use std::sync::Arc;

use crate::config::{AppConfig, Backend};

/// Build the configured store and serve the API until the process stops.
///
/// `LOAD_SEED_DATA=true` inserts the demo rows before the listener opens.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let registry = Arc::new(seed::build_registry()?);
    let load_seed = std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true";

    match config.database.backend {
        Backend::Memory => {
            log::info!("Using the in-memory store");
            let store = Arc::new(MemoryStore::new(registry.clone()));
            serve(store, registry, &config, load_seed).await
        }
        Backend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let store =
                PostgresStore::new(&database_url, config.max_connections(), registry.clone())
                    .await?;

            // Run migrations
            store.migrate().await?;
            serve(Arc::new(store), registry, &config, load_seed).await
        }
    }
}

async fn serve<S: ResourceStore + 'static>(
    store: Arc<S>,
    registry: Arc<model::ModelRegistry>,
    config: &AppConfig,
    load_seed: bool,
) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    if load_seed {
        log::info!("Loading seed data...");
        seed::load_seed_data(store.as_ref(), &registry).await?;
    }

    let state = api::AppState::new(store, registry, config.query.default_limit);
    let app = api::create_app(state, &config.server.api_prefix);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    log::info!(
        "resource-query listening on http://{}{}",
        bind_address,
        config.server.api_prefix
    );

    serve(listener, app).await?;

    Ok(())
}
