use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use quill::credentials::KeyRetrievalStrategy;
use quill::orchestrator::{OrchestratorConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_TURN_TIMEOUT};
use quill::providers::configs::ProvidersConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| {
            ConfigError::Other(config::ConfigError::Message(format!(
                "Invalid server address {}",
                addr
            )))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

impl ChatSettings {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: self.max_iterations,
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
        }
    }
}

/// Statically configured API keys, as owner id -> provider name -> key
pub type KeyTable = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub strategy: KeyRetrievalStrategy,
    /// Fall back to OPENAI_API_KEY and friends when no stored key is found
    #[serde(default = "default_use_env")]
    pub use_env: bool,
    #[serde(default)]
    pub personal: KeyTable,
    #[serde(default)]
    pub organization: KeyTable,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            strategy: KeyRetrievalStrategy::default(),
            use_env: default_use_env(),
            personal: KeyTable::new(),
            organization: KeyTable::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub debug: DebugSettings,
}

impl Settings {
    /// Load defaults, then `quill.toml` from the working directory if present,
    /// then `QUILL_` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("quill").required(false),
        };

        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Chat loop defaults
            .set_default("chat.max_iterations", default_max_iterations() as u64)?
            .set_default("chat.turn_timeout_secs", default_turn_timeout_secs())?
            .add_source(file)
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("QUILL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        let settings = match result {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                return if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                };
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.debug.enabled && self.debug.dir.is_none() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("debug.dir"),
            });
        }
        if self.chat.max_iterations == 0 {
            return Err(ConfigError::Other(config::ConfigError::Message(
                "chat.max_iterations must be at least 1".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_turn_timeout_secs() -> u64 {
    DEFAULT_TURN_TIMEOUT.as_secs()
}

fn default_use_env() -> bool {
    true
}
