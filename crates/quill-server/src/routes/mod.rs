// Export route modules
pub mod chat;
pub mod debug;
pub mod status;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(debug::routes(state))
        .merge(status::routes())
}

#[cfg(test)]
pub(crate) fn test_state(
    turns: Vec<quill::providers::mock::MockTurn>,
) -> (AppState, std::sync::Arc<quill::providers::mock::MockProvider>) {
    use quill::credentials::{KeyRetrievalStrategy, LayeredCredentialResolver, MemoryKeyStore};
    use quill::orchestrator::ChatOrchestrator;
    use quill::providers::mock::MockProvider;
    use quill::providers::{ProviderName, ProviderRegistry};
    use quill::tools::{CatalogToolExecutor, MemoryNotesStore};
    use std::sync::Arc;

    let provider = Arc::new(MockProvider::new(ProviderName::OpenAi, turns));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let resolver = LayeredCredentialResolver::new(
        Arc::new(MemoryKeyStore::new().with_key("alice", ProviderName::OpenAi, "sk-alice")),
        Arc::new(MemoryKeyStore::new()),
        KeyRetrievalStrategy::PersonalFirst,
    );
    let orchestrator = ChatOrchestrator::new(
        registry,
        Arc::new(resolver),
        Arc::new(CatalogToolExecutor::new(Arc::new(MemoryNotesStore::new()))),
    );
    (AppState::new(orchestrator), provider)
}
