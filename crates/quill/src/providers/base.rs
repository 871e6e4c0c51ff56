use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{ProviderResult, UpstreamError};
use crate::models::event::CanonicalEvent;
use crate::models::message::Message;
use crate::models::tool::Tool;

/// The closed set of upstream model vendors
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderName {
    OpenAi,
    Anthropic,
    Google,
}

/// A provider-agnostic request for one model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// Ask for the provider's extended reasoning mode
    pub thinking: bool,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

/// A provider-native request body along with anything that could not be expressed
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub payload: Value,
    pub warnings: Vec<String>,
}

impl Translated {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            warnings: Vec::new(),
        }
    }
}

pub type EventStream = BoxStream<'static, Result<CanonicalEvent, UpstreamError>>;

/// Base trait for model providers (OpenAI, Anthropic, Google)
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Build the native request body for a canonical request
    fn translate(&self, request: &CompletionRequest) -> ProviderResult<Translated>;

    /// Start a streaming invocation. The returned stream ends with exactly one
    /// `CanonicalEvent::Finish`.
    async fn stream(&self, api_key: &str, request: &CompletionRequest)
        -> ProviderResult<EventStream>;
}
