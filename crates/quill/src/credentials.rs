use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::providers::ProviderName;

/// Who is making a chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: String,
    pub org_id: Option<String>,
}

impl CallerIdentity {
    pub fn new<S: Into<String>>(user_id: S) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: None,
        }
    }

    pub fn with_org<S: Into<String>>(mut self, org_id: S) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No API key configured for {provider}")]
    NotConfigured { provider: ProviderName },

    #[error("Failed to read key store: {0}")]
    Store(String),
}

impl From<env::VarError> for CredentialError {
    fn from(err: env::VarError) -> Self {
        CredentialError::Store(err.to_string())
    }
}

/// Anything that can produce the API key for a caller and provider
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        caller: &CallerIdentity,
        provider: ProviderName,
    ) -> Result<String, CredentialError>;
}

/// A source of API keys, keyed by owner (a user or an organization id)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_key(
        &self,
        owner: &str,
        provider: ProviderName,
    ) -> Result<Option<String>, CredentialError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRetrievalStrategy {
    /// Only look at the user's own keys
    PersonalOnly,
    /// Only look at the organization's keys
    OrganizationOnly,
    /// Try the user's keys first, then the organization's
    #[default]
    PersonalFirst,
    /// Try the organization's keys first, then the user's
    OrganizationFirst,
}

#[derive(Debug, Clone, Copy)]
enum Layer {
    Personal,
    Organization,
}

impl KeyRetrievalStrategy {
    fn layers(&self) -> &'static [Layer] {
        match self {
            KeyRetrievalStrategy::PersonalOnly => &[Layer::Personal],
            KeyRetrievalStrategy::OrganizationOnly => &[Layer::Organization],
            KeyRetrievalStrategy::PersonalFirst => &[Layer::Personal, Layer::Organization],
            KeyRetrievalStrategy::OrganizationFirst => &[Layer::Organization, Layer::Personal],
        }
    }
}

/// Resolves keys from a personal and an organization store in the order the
/// strategy gives, then from an optional fallback store
pub struct LayeredCredentialResolver {
    personal: Arc<dyn KeyStore>,
    organization: Arc<dyn KeyStore>,
    fallback: Option<Arc<dyn KeyStore>>,
    strategy: KeyRetrievalStrategy,
}

impl LayeredCredentialResolver {
    pub fn new(
        personal: Arc<dyn KeyStore>,
        organization: Arc<dyn KeyStore>,
        strategy: KeyRetrievalStrategy,
    ) -> Self {
        Self {
            personal,
            organization,
            fallback: None,
            strategy,
        }
    }

    /// Consult this store, keyed by user id, when neither layer has a key
    pub fn with_fallback(mut self, fallback: Arc<dyn KeyStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn lookup(
        store: &dyn KeyStore,
        owner: &str,
        provider: ProviderName,
    ) -> Option<String> {
        match store.get_key(owner, provider).await {
            Ok(Some(key)) if !key.trim().is_empty() => Some(key.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(%provider, "Could not read key store: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CredentialResolver for LayeredCredentialResolver {
    async fn resolve(
        &self,
        caller: &CallerIdentity,
        provider: ProviderName,
    ) -> Result<String, CredentialError> {
        for layer in self.strategy.layers() {
            let found = match layer {
                Layer::Personal => {
                    Self::lookup(self.personal.as_ref(), &caller.user_id, provider).await
                }
                Layer::Organization => match caller.org_id.as_deref() {
                    Some(org_id) => Self::lookup(self.organization.as_ref(), org_id, provider).await,
                    None => None,
                },
            };
            if let Some(key) = found {
                debug!(%provider, layer = ?layer, "Resolved API key");
                return Ok(key);
            }
        }

        if let Some(fallback) = &self.fallback {
            if let Some(key) = Self::lookup(fallback.as_ref(), &caller.user_id, provider).await {
                debug!(%provider, "Resolved API key from fallback store");
                return Ok(key);
            }
        }

        Err(CredentialError::NotConfigured { provider })
    }
}

/// Keys held in memory
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<(String, ProviderName), String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key<O, K>(mut self, owner: O, provider: ProviderName, key: K) -> Self
    where
        O: Into<String>,
        K: Into<String>,
    {
        self.keys
            .get_mut()
            .insert((owner.into(), provider), key.into());
        self
    }

    pub async fn insert(&self, owner: &str, provider: ProviderName, key: &str) {
        self.keys
            .write()
            .await
            .insert((owner.to_string(), provider), key.to_string());
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_key(
        &self,
        owner: &str,
        provider: ProviderName,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self
            .keys
            .read()
            .await
            .get(&(owner.to_string(), provider))
            .cloned())
    }
}

#[cfg_attr(test, automock)]
pub trait Environment: Send + Sync {
    fn get_var(&self, key: &str) -> Result<String, env::VarError>;
}

// Implement the trait for the actual environment
pub struct RealEnvironment;

impl Environment for RealEnvironment {
    fn get_var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

/// The environment variable holding the process-wide key for a provider
pub fn env_var(provider: ProviderName) -> &'static str {
    match provider {
        ProviderName::OpenAi => "OPENAI_API_KEY",
        ProviderName::Anthropic => "ANTHROPIC_API_KEY",
        ProviderName::Google => "GOOGLE_API_KEY",
    }
}

/// Process-wide keys from the environment. The owner is ignored.
pub struct EnvKeyStore<E: Environment = RealEnvironment> {
    env: E,
}

impl EnvKeyStore<RealEnvironment> {
    pub fn new() -> Self {
        Self {
            env: RealEnvironment,
        }
    }
}

impl Default for EnvKeyStore<RealEnvironment> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Environment> EnvKeyStore<E> {
    pub fn with_environment(env: E) -> Self {
        Self { env }
    }
}

#[async_trait]
impl<E: Environment> KeyStore for EnvKeyStore<E> {
    async fn get_key(
        &self,
        _owner: &str,
        provider: ProviderName,
    ) -> Result<Option<String>, CredentialError> {
        match self.env.get_var(env_var(provider)) {
            Ok(key) => Ok(Some(key)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
