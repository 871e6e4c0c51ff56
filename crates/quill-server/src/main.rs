mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Result;
use configuration::{KeyTable, Settings};
use quill::{
    credentials::{EnvKeyStore, LayeredCredentialResolver, MemoryKeyStore},
    orchestrator::ChatOrchestrator,
    providers::{ProviderName, ProviderRegistry},
    tools::{CatalogToolExecutor, MemoryNotesStore},
};
use std::{path::Path, str::FromStr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

// Seed an in-memory key store from the statically configured keys
fn key_store(table: &KeyTable) -> MemoryKeyStore {
    let mut store = MemoryKeyStore::new();
    for (owner, keys) in table {
        for (provider, key) in keys {
            match ProviderName::from_str(provider) {
                Ok(name) => store = store.with_key(owner.as_str(), name, key.as_str()),
                Err(_) => tracing::warn!("Ignoring key for unknown provider {}", provider),
            }
        }
    }
    store
}

fn build_state(settings: &Settings) -> Result<state::AppState> {
    let registry = ProviderRegistry::from_settings(&settings.providers)?;

    let credentials = &settings.credentials;
    let mut resolver = LayeredCredentialResolver::new(
        Arc::new(key_store(&credentials.personal)),
        Arc::new(key_store(&credentials.organization)),
        credentials.strategy,
    );
    if credentials.use_env {
        resolver = resolver.with_fallback(Arc::new(EnvKeyStore::new()));
    }

    let tools = CatalogToolExecutor::new(Arc::new(MemoryNotesStore::new()));
    let orchestrator = ChatOrchestrator::new(registry, Arc::new(resolver), Arc::new(tools))
        .with_config(settings.chat.orchestrator_config());

    let mut state = state::AppState::new(orchestrator);
    if settings.debug.enabled {
        if let Some(dir) = &settings.debug.dir {
            state = state.with_debug_dir(dir.clone());
        }
    }
    Ok(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration, from an explicit file when one is given
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_file(Path::new(&path))?,
        None => Settings::new()?,
    };
    let state = build_state(&settings)?;

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
