use serde::{Deserialize, Serialize};

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";

/// Default output ceiling for Anthropic, which requires one on every request
pub const ANTHROPIC_MAX_TOKENS: i32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_openai_host")]
    pub host: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    #[serde(default = "default_anthropic_host")]
    pub host: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleProviderConfig {
    #[serde(default = "default_google_host")]
    pub host: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

/// Connection settings for every provider adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiProviderConfig,
    #[serde(default)]
    pub anthropic: AnthropicProviderConfig,
    #[serde(default)]
    pub google: GoogleProviderConfig,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            host: default_openai_host(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            host: default_anthropic_host(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Default for GoogleProviderConfig {
    fn default() -> Self {
        Self {
            host: default_google_host(),
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_google_host() -> String {
    GOOGLE_HOST.to_string()
}
