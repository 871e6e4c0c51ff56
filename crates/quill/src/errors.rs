use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::credentials::CredentialError;

/// Category of an upstream model failure, chosen by each adapter from the
/// provider's HTTP status and structured error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    InvalidCredential,
    QuotaExceeded,
    RateLimited,
    ModelUnavailable,
    Generic,
}

impl UpstreamErrorKind {
    /// Message safe to show to the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            UpstreamErrorKind::InvalidCredential => {
                "The API key configured for this provider was rejected"
            }
            UpstreamErrorKind::QuotaExceeded => "The quota for this provider has been exceeded",
            UpstreamErrorKind::RateLimited => {
                "The provider is rate limiting requests, please try again shortly"
            }
            UpstreamErrorKind::ModelUnavailable => "The requested model is currently unavailable",
            UpstreamErrorKind::Generic => "The model provider returned an error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Upstream error ({kind:?}): {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new<S: Into<String>>(kind: UpstreamErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::new(UpstreamErrorKind::Generic, message)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::generic(format!("Transport error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request translation failed: {0}")]
    Translation(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Request translation failed: {0}")]
    Translation(String),

    #[error(transparent)]
    Upstream(UpstreamError),

    #[error("Tool loop exceeded {0} model invocations")]
    IterationLimit(usize),

    #[error("Turn exceeded the {0:?} time limit")]
    Timeout(Duration),

    #[error("Client disconnected")]
    ClientDisconnected,
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Translation(msg) => ChatError::Translation(msg),
            ProviderError::Upstream(err) => ChatError::Upstream(err),
        }
    }
}

impl ChatError {
    /// HTTP status class used when the error happens before streaming starts
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) | ChatError::Credential(_) => 400,
            ChatError::Upstream(_) => 502,
            ChatError::Timeout(_) => 504,
            ChatError::Translation(_)
            | ChatError::IterationLimit(_)
            | ChatError::ClientDisconnected => 500,
        }
    }

    /// Message sent to the client, either as a JSON body or an in-band error frame
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Upstream(err) => err.kind.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
