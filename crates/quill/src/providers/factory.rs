use std::collections::HashMap;
use std::sync::Arc;

use super::{
    anthropic::AnthropicProvider,
    base::{Provider, ProviderName},
    configs::ProvidersConfig,
    google::GoogleProvider,
    openai::OpenAiProvider,
};
use crate::errors::ProviderResult;

/// Adapters keyed by provider name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with the three HTTP adapters
    pub fn from_settings(config: &ProvidersConfig) -> ProviderResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiProvider::new(config.openai.clone())?));
        registry.register(Arc::new(AnthropicProvider::new(config.anthropic.clone())?));
        registry.register(Arc::new(GoogleProvider::new(config.google.clone())?));
        Ok(registry)
    }

    /// Add an adapter, replacing any registered under the same name
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn Provider>> {
        self.providers.get(&name).cloned()
    }

    pub fn names(&self) -> Vec<ProviderName> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_by_key(|name| name.to_string());
        names
    }
}
