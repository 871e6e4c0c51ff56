use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::base::{CompletionRequest, EventStream, Provider, ProviderName, Translated};
use super::configs::{AnthropicProviderConfig, ANTHROPIC_MAX_TOKENS};
use super::sse::{self, SseEvent, StreamDecoder};
use super::utils::{self, kind_from_status, parse_arguments, result_text};
use crate::errors::{ProviderError, ProviderResult, UpstreamError, UpstreamErrorKind};
use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const THINKING_BUDGET: i32 = 4096;

const NO_THINKING_PREFIXES: [&str; 6] = [
    "claude-2",
    "claude-instant",
    "claude-3-haiku",
    "claude-3-sonnet",
    "claude-3-opus",
    "claude-3-5",
];

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: utils::http_client()?,
            config,
        })
    }

    fn supports_thinking(model: &str) -> bool {
        !NO_THINKING_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }
}

/// Whether the latest assistant turn asked for tools, meaning this request
/// continues a tool exchange
fn continues_tool_use(messages: &[Message]) -> bool {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .is_some_and(|m| m.tool_requests().next().is_some())
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Anthropic
    }

    fn translate(&self, request: &CompletionRequest) -> ProviderResult<Translated> {
        utils::check_messages(&request.messages)?;
        let (system, rest) = utils::split_system(&request.messages)?;
        let mut warnings = Vec::new();

        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_anthropic_spec(rest)?,
            "max_tokens": self.config.max_tokens.unwrap_or(ANTHROPIC_MAX_TOKENS),
            "stream": true,
        });

        if let Some(system) = system {
            payload["system"] = json!(system);
        }

        let tools = tools_to_anthropic_spec(&request.tools)?;
        if !tools.is_empty() {
            payload["tools"] = json!(tools);
        }

        let mut thinking = false;
        if request.thinking {
            if !Self::supports_thinking(&request.model) {
                warnings.push(format!(
                    "model {} does not support extended thinking, thinking ignored",
                    request.model
                ));
            } else if continues_tool_use(rest) {
                warnings.push(
                    "extended thinking disabled while continuing a tool exchange".to_string(),
                );
            } else {
                thinking = true;
                let max_tokens = self.config.max_tokens.unwrap_or(ANTHROPIC_MAX_TOKENS);
                payload["thinking"] = json!({
                    "type": "enabled",
                    "budget_tokens": THINKING_BUDGET,
                });
                // the budget counts against max_tokens
                payload["max_tokens"] = json!(max_tokens.max(THINKING_BUDGET + ANTHROPIC_MAX_TOKENS));
            }
        }

        if let Some(temp) = self.config.temperature {
            if thinking {
                warnings.push("temperature is not supported with extended thinking".to_string());
            } else {
                payload["temperature"] = json!(temp);
            }
        }

        Ok(Translated { payload, warnings })
    }

    async fn stream(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> ProviderResult<EventStream> {
        let translated = self.translate(request)?;
        for warning in &translated.warnings {
            warn!(provider = "anthropic", "{}", warning);
        }

        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        debug!(model = %request.model, messages = request.messages.len(), "Anthropic streaming request");

        let response = utils::send(
            self.client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&translated.payload),
            classify_error,
        )
        .await?;

        Ok(sse::decode(response, AnthropicStreamDecoder::default()))
    }
}

/// Convert non-system messages to Anthropic's message specification
pub fn messages_to_anthropic_spec(messages: &[Message]) -> ProviderResult<Vec<Value>> {
    let mut spec = Vec::new();

    for message in messages {
        let mut blocks = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::ToolRequest(request) => {
                    let input = if request.tool_call.arguments.is_object() {
                        request.tool_call.arguments.clone()
                    } else {
                        json!({})
                    };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": request.id,
                        "name": request.tool_call.name,
                        "input": input,
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": response.id,
                        "content": result_text(&response.tool_result),
                        "is_error": response.tool_result.get("error").is_some(),
                    }));
                }
            }
        }

        let role = match message.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
            Role::System => {
                return Err(ProviderError::Translation(
                    "system messages must be passed as the system field".to_string(),
                ))
            }
        };
        spec.push(json!({"role": role, "content": blocks}));
    }

    Ok(spec)
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    utils::check_tools(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema(),
            })
        })
        .collect())
}

fn type_kind(error_type: &str) -> Option<UpstreamErrorKind> {
    match error_type {
        "authentication_error" | "permission_error" => Some(UpstreamErrorKind::InvalidCredential),
        "billing_error" => Some(UpstreamErrorKind::QuotaExceeded),
        "rate_limit_error" => Some(UpstreamErrorKind::RateLimited),
        "overloaded_error" | "not_found_error" => Some(UpstreamErrorKind::ModelUnavailable),
        _ => None,
    }
}

pub fn classify_error(status: StatusCode, body: &Value) -> UpstreamErrorKind {
    body["error"]["type"]
        .as_str()
        .and_then(type_kind)
        .unwrap_or_else(|| kind_from_status(status))
}

fn stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        _ => FinishReason::Error,
    }
}

#[derive(Debug, Default)]
struct PartialToolUse {
    id: String,
    name: String,
    input: String,
}

/// Decodes the Messages API event stream
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    tool_uses: HashMap<u64, PartialToolUse>,
    stop_reason: Option<FinishReason>,
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<CanonicalEvent>, UpstreamError> {
        let data: Value = serde_json::from_str(&event.data)
            .map_err(|e| UpstreamError::generic(format!("Invalid Anthropic event: {}", e)))?;
        let event_type = data["type"]
            .as_str()
            .or(event.event.as_deref())
            .unwrap_or_default();
        let index = data["index"].as_u64().unwrap_or(0);
        let mut out = Vec::new();

        match event_type {
            "content_block_start" => {
                let block = &data["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        self.tool_uses.insert(
                            index,
                            PartialToolUse {
                                id: block["id"].as_str().unwrap_or_default().to_string(),
                                name: block["name"].as_str().unwrap_or_default().to_string(),
                                input: String::new(),
                            },
                        );
                    }
                    Some("text") => {
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            out.push(CanonicalEvent::text(text));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            out.push(CanonicalEvent::text(text));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(partial), Some(json)) = (
                            self.tool_uses.get_mut(&index),
                            delta["partial_json"].as_str(),
                        ) {
                            partial.input.push_str(json);
                        }
                    }
                    // thinking and signature deltas are not part of the answer
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(partial) = self.tool_uses.remove(&index) {
                    out.push(CanonicalEvent::tool_call(
                        partial.id,
                        ToolCall::new(partial.name, parse_arguments(&partial.input)),
                    ));
                }
            }
            "message_delta" => {
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(stop_reason(reason));
                }
            }
            "message_stop" => {
                out.push(CanonicalEvent::Finish(
                    self.stop_reason.unwrap_or(FinishReason::Error),
                ));
            }
            "error" => {
                let kind = data["error"]["type"]
                    .as_str()
                    .and_then(type_kind)
                    .unwrap_or(UpstreamErrorKind::Generic);
                let message = data["error"]["message"].as_str().unwrap_or("stream error");
                return Err(UpstreamError::new(kind, message));
            }
            _ => {}
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        // the body ended without message_stop
        vec![CanonicalEvent::Finish(FinishReason::Error)]
    }
}
