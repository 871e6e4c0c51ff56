use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use crate::errors::{ProviderError, ProviderResult, UpstreamError, UpstreamErrorKind};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

lazy_static! {
    static ref FUNCTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

pub fn http_client() -> ProviderResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(600)) // 10 minutes timeout
        .build()
        .map_err(|e| ProviderError::Upstream(e.into()))
}

/// Every message must carry content its role allows
pub fn check_messages(messages: &[Message]) -> ProviderResult<()> {
    for (index, message) in messages.iter().enumerate() {
        message
            .check_content()
            .map_err(|e| ProviderError::Translation(format!("message {}: {}", index, e)))?;
    }
    Ok(())
}

/// Tool names must be unique and usable as function names by every provider
pub fn check_tools(tools: &[Tool]) -> ProviderResult<()> {
    let mut names = HashSet::new();
    for tool in tools {
        if !FUNCTION_NAME.is_match(&tool.name) {
            return Err(ProviderError::Translation(format!(
                "Tool name '{}' must match [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        if !names.insert(tool.name.as_str()) {
            return Err(ProviderError::Translation(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

/// Split leading system messages from the rest of the conversation, for
/// providers that take the system prompt as a separate field
pub fn split_system(messages: &[Message]) -> ProviderResult<(Option<String>, &[Message])> {
    let leading = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();
    let (system, rest) = messages.split_at(leading);

    if let Some(index) = rest.iter().position(|m| m.role == Role::System) {
        return Err(ProviderError::Translation(format!(
            "message {}: system messages are only supported at the start of the conversation",
            leading + index
        )));
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(
            system
                .iter()
                .map(|m| m.text())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    Ok((system, rest))
}

/// Parse streamed tool arguments. Unparsable input is kept as a string so the
/// tool executor can report it back to the model.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Render a tool result for providers that take tool output as a string
pub fn result_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fallback classification when the provider gives no usable error code
pub fn kind_from_status(status: StatusCode) -> UpstreamErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamErrorKind::InvalidCredential,
        StatusCode::PAYMENT_REQUIRED => UpstreamErrorKind::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS => UpstreamErrorKind::RateLimited,
        StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => {
            UpstreamErrorKind::ModelUnavailable
        }
        _ => UpstreamErrorKind::Generic,
    }
}

/// The `error.message` field shared by all three providers' error bodies
pub fn error_message(body: &Value) -> Option<String> {
    let body = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    body.get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}

/// Send a request, turning any non-success status into a classified upstream error
pub async fn send<F>(request: RequestBuilder, classify: F) -> Result<Response, UpstreamError>
where
    F: Fn(StatusCode, &Value) -> UpstreamErrorKind,
{
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let kind = classify(status, &body);
    let detail = error_message(&body).unwrap_or_else(|| text.chars().take(200).collect());
    Err(UpstreamError::new(kind, format!("HTTP {}: {}", status, detail)))
}
