use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quill::errors::ChatError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Convert a configuration field path (e.g. "server.port") to an environment variable name
pub fn to_env_var(field_path: &str) -> String {
    let mut env_var = String::from("QUILL_");
    for (i, part) in field_path.split('.').enumerate() {
        if i > 0 {
            env_var.push_str("__");
        }
        env_var.push_str(&part.to_uppercase());
    }
    env_var
}

/// An error returned as a plain `{error}` JSON body, before any stream starts
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.user_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill::credentials::CredentialError;
    use quill::providers::ProviderName;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "QUILL_SERVER__PORT");
        assert_eq!(
            to_env_var("providers.openai.host"),
            "QUILL_PROVIDERS__OPENAI__HOST"
        );
        assert_eq!(to_env_var("debug"), "QUILL_DEBUG");
    }

    #[test]
    fn test_chat_error_status() {
        let err: ApiError = ChatError::Credential(CredentialError::NotConfigured {
            provider: ProviderName::Google,
        })
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No API key configured for google");

        let err: ApiError = ChatError::Translation("orphan tool result".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
