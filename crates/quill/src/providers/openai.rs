use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::base::{CompletionRequest, EventStream, Provider, ProviderName, Translated};
use super::configs::OpenAiProviderConfig;
use super::sse::{self, SseEvent, StreamDecoder};
use super::utils::{self, kind_from_status, parse_arguments, result_text};
use crate::errors::{ProviderResult, UpstreamError, UpstreamErrorKind};
use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const REASONING_EFFORT: &str = "medium";

const REASONING_MODEL_PREFIXES: [&str; 4] = ["o1", "o3", "o4", "gpt-5"];

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: utils::http_client()?,
            config,
        })
    }

    fn supports_reasoning(model: &str) -> bool {
        REASONING_MODEL_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> ProviderName {
        ProviderName::OpenAi
    }

    fn translate(&self, request: &CompletionRequest) -> ProviderResult<Translated> {
        let mut warnings = Vec::new();
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_openai_spec(&request.messages)?,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let tools = tools_to_openai_spec(&request.tools)?;
        if !tools.is_empty() {
            payload["tools"] = json!(tools);
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_completion_tokens"] = json!(tokens);
        }
        if request.thinking {
            if Self::supports_reasoning(&request.model) {
                payload["reasoning_effort"] = json!(REASONING_EFFORT);
            } else {
                warnings.push(format!(
                    "model {} does not support reasoning effort, thinking ignored",
                    request.model
                ));
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
            warn!(provider = "openai", "{}", warning);
        }

        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        debug!(model = %request.model, messages = request.messages.len(), "OpenAI streaming request");

        let response = utils::send(
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&translated.payload),
            classify_error,
        )
        .await?;

        Ok(sse::decode(response, OpenAiStreamDecoder::default()))
    }
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> ProviderResult<Vec<Value>> {
    utils::check_messages(messages)?;
    let mut spec = Vec::new();

    for message in messages {
        match message.role {
            Role::System | Role::User => spec.push(json!({
                "role": message.role,
                "content": message.text(),
            })),
            Role::Assistant => {
                let text = message.text();
                let mut converted = json!({
                    "role": "assistant",
                    "content": if text.is_empty() { Value::Null } else { json!(text) },
                });
                let tool_calls: Vec<Value> = message
                    .tool_requests()
                    .map(|request| {
                        json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": request.tool_call.name,
                                "arguments": result_text(&request.tool_call.arguments),
                            }
                        })
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                spec.push(converted);
            }
            Role::Tool => {
                for content in &message.content {
                    if let MessageContent::ToolResponse(response) = content {
                        spec.push(json!({
                            "role": "tool",
                            "tool_call_id": response.id,
                            "content": result_text(&response.tool_result),
                        }));
                    }
                }
            }
        }
    }

    Ok(spec)
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    utils::check_tools(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema(),
                }
            })
        })
        .collect())
}

fn code_kind(code: &str) -> Option<UpstreamErrorKind> {
    match code {
        "invalid_api_key" | "invalid_authentication" => Some(UpstreamErrorKind::InvalidCredential),
        "insufficient_quota" => Some(UpstreamErrorKind::QuotaExceeded),
        "rate_limit_exceeded" => Some(UpstreamErrorKind::RateLimited),
        "model_not_found" => Some(UpstreamErrorKind::ModelUnavailable),
        _ => None,
    }
}

fn error_code(error: &Value) -> Option<&str> {
    error
        .get("code")
        .and_then(|c| c.as_str())
        .or_else(|| error.get("type").and_then(|t| t.as_str()))
}

pub fn classify_error(status: StatusCode, body: &Value) -> UpstreamErrorKind {
    body.get("error")
        .and_then(error_code)
        .and_then(code_kind)
        .unwrap_or_else(|| kind_from_status(status))
}

fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        _ => FinishReason::Error,
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Decodes chat completion chunks. Tool call fragments arrive keyed by index
/// and are emitted together once the finish reason is known.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    tool_calls: BTreeMap<u64, PartialToolCall>,
    finish_reason: Option<FinishReason>,
}

impl OpenAiStreamDecoder {
    fn drain_tool_calls(&mut self) -> Vec<CanonicalEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|partial| {
                let id = if partial.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    partial.id
                };
                CanonicalEvent::tool_call(
                    id,
                    ToolCall::new(partial.name, parse_arguments(&partial.arguments)),
                )
            })
            .collect()
    }

    fn terminal(&mut self) -> Vec<CanonicalEvent> {
        let mut out = self.drain_tool_calls();
        out.push(CanonicalEvent::Finish(
            self.finish_reason.unwrap_or(FinishReason::Error),
        ));
        out
    }
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<CanonicalEvent>, UpstreamError> {
        if event.data.trim() == "[DONE]" {
            return Ok(self.terminal());
        }

        let chunk: Value = serde_json::from_str(&event.data)
            .map_err(|e| UpstreamError::generic(format!("Invalid OpenAI chunk: {}", e)))?;

        if let Some(error) = chunk.get("error") {
            let kind = error_code(error)
                .and_then(code_kind)
                .unwrap_or(UpstreamErrorKind::Generic);
            let message = error["message"].as_str().unwrap_or("stream error");
            return Err(UpstreamError::new(kind, message));
        }

        let mut out = Vec::new();
        let Some(choice) = chunk["choices"].get(0) else {
            // usage-only chunk
            return Ok(out);
        };

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                out.push(CanonicalEvent::text(text));
            }
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    partial.id = id.to_string();
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    partial.name.push_str(name);
                }
                if let Some(arguments) = fragment["function"]["arguments"].as_str() {
                    partial.arguments.push_str(arguments);
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(finish_reason(reason));
            out.extend(self.drain_tool_calls());
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        self.terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::models::tool::ParameterType;
    use crate::providers::sse::decode_all;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(host: &str) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiProviderConfig {
            host: host.to_string(),
            temperature: None,
            max_tokens: None,
        })
        .unwrap()
    }

    fn request(model: &str, thinking: bool) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            thinking,
            messages: vec![
                Message::system().with_text("You are helpful."),
                Message::user().with_text("Hello"),
            ],
            tools: vec![],
        }
    }

    fn chunk(delta: Value, finish_reason: Value) -> SseEvent {
        SseEvent::data(
            json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]})
                .to_string(),
        )
    }

    #[test]
    fn test_messages_to_openai_spec_complex() -> ProviderResult<()> {
        let messages = vec![
            Message::assistant().with_text("Hello!"),
            Message::user().with_text("How are you?"),
            Message::assistant().with_tool_request(
                "tool1",
                ToolCall::new("example", json!({"param1": "value1"})),
            ),
            Message::tool().with_tool_response("tool1", json!({"ok": true})),
        ];

        let spec = messages_to_openai_spec(&messages)?;

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0]["role"], "assistant");
        assert_eq!(spec[0]["content"], "Hello!");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[2]["content"], Value::Null);
        assert_eq!(spec[2]["tool_calls"][0]["function"]["arguments"], "{\"param1\":\"value1\"}");
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["content"], "{\"ok\":true}");
        assert_eq!(spec[3]["tool_call_id"], spec[2]["tool_calls"][0]["id"]);
        Ok(())
    }

    #[test]
    fn test_messages_to_openai_spec_rejects_bad_content() {
        let messages = vec![Message::user().with_tool_response("1", json!({}))];
        let err = messages_to_openai_spec(&messages).unwrap_err();
        assert!(matches!(err, ProviderError::Translation(_)));
    }

    #[test]
    fn test_tools_to_openai_spec() -> ProviderResult<()> {
        let tool = Tool::new("get_note", "Fetch a note").required(
            "note_id",
            ParameterType::String,
            "The note id",
        );
        let spec = tools_to_openai_spec(&[tool])?;
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "get_note");
        assert_eq!(spec[0]["function"]["parameters"]["required"], json!(["note_id"]));
        Ok(())
    }

    #[test]
    fn test_thinking_for_reasoning_model() -> ProviderResult<()> {
        let translated = provider(OPENAI_TEST_HOST).translate(&request("o3-mini", true))?;
        assert_eq!(translated.payload["reasoning_effort"], "medium");
        assert!(translated.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn test_thinking_unsupported_is_a_warning() -> ProviderResult<()> {
        let translated = provider(OPENAI_TEST_HOST).translate(&request("gpt-4o", true))?;
        assert!(translated.payload.get("reasoning_effort").is_none());
        assert_eq!(translated.warnings.len(), 1);
        Ok(())
    }

    const OPENAI_TEST_HOST: &str = "http://localhost";

    #[test]
    fn test_decoder_text_then_stop() {
        let events = decode_all(
            OpenAiStreamDecoder::default(),
            &[
                chunk(json!({"role": "assistant", "content": "Hi"}), Value::Null),
                chunk(json!({"content": " there"}), Value::Null),
                chunk(json!({}), json!("stop")),
                SseEvent::data("[DONE]"),
            ],
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                CanonicalEvent::text("Hi"),
                CanonicalEvent::text(" there"),
                CanonicalEvent::Finish(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn test_decoder_assembles_tool_call_fragments() {
        let events = decode_all(
            OpenAiStreamDecoder::default(),
            &[
                chunk(
                    json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                        "function": {"name": "get_note", "arguments": ""}}]}),
                    Value::Null,
                ),
                chunk(
                    json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"note_id\":"}}]}),
                    Value::Null,
                ),
                chunk(
                    json!({"tool_calls": [{"index": 0, "function": {"arguments": "\"n1\"}"}}]}),
                    Value::Null,
                ),
                chunk(json!({}), json!("tool_calls")),
                SseEvent::data("[DONE]"),
            ],
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                CanonicalEvent::tool_call(
                    "call_1",
                    ToolCall::new("get_note", json!({"note_id": "n1"}))
                ),
                CanonicalEvent::Finish(FinishReason::ToolCalls),
            ]
        );
    }

    #[test]
    fn test_decoder_length_and_missing_done() {
        let events = decode_all(
            OpenAiStreamDecoder::default(),
            &[
                chunk(json!({"content": "truncated"}), Value::Null),
                chunk(json!({}), json!("length")),
            ],
        )
        .unwrap();
        assert_eq!(events.last(), Some(&CanonicalEvent::Finish(FinishReason::Length)));
    }

    #[test]
    fn test_decoder_stream_without_finish_is_error() {
        let events = decode_all(
            OpenAiStreamDecoder::default(),
            &[chunk(json!({"content": "cut off"}), Value::Null)],
        )
        .unwrap();
        assert_eq!(events.last(), Some(&CanonicalEvent::Finish(FinishReason::Error)));
    }

    #[test]
    fn test_decoder_in_stream_error() {
        let err = decode_all(
            OpenAiStreamDecoder::default(),
            &[SseEvent::data(
                json!({"error": {"message": "slow down", "code": "rate_limit_exceeded"}})
                    .to_string(),
            )],
        )
        .unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::RateLimited);
    }

    #[test]
    fn test_classify_error() {
        let body = json!({"error": {"code": "insufficient_quota", "message": "You exceeded your quota"}});
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, &body),
            UpstreamErrorKind::QuotaExceeded
        );
        let body = json!({"error": {"code": null, "message": "server exploded"}});
        assert_eq!(
            classify_error(StatusCode::INTERNAL_SERVER_ERROR, &body),
            UpstreamErrorKind::Generic
        );
        assert_eq!(
            classify_error(StatusCode::UNAUTHORIZED, &Value::Null),
            UpstreamErrorKind::InvalidCredential
        );
    }

    #[tokio::test]
    async fn test_stream_over_http() -> anyhow::Result<()> {
        let body = [
            chunk(json!({"role": "assistant", "content": "Hello"}), Value::Null),
            chunk(json!({"content": " world"}), Value::Null),
            chunk(json!({}), json!("stop")),
            SseEvent::data("[DONE]"),
        ]
        .iter()
        .map(|e| format!("data: {}\n\n", e.data))
        .collect::<String>();

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = provider(&mock_server.uri());
        let stream = provider
            .stream("test_api_key", &request("gpt-4o", false))
            .await?;
        let events: Vec<_> = stream.collect().await;
        let events: Result<Vec<_>, _> = events.into_iter().collect();

        assert_eq!(
            events?,
            vec![
                CanonicalEvent::text("Hello"),
                CanonicalEvent::text(" world"),
                CanonicalEvent::Finish(FinishReason::Stop),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_invalid_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}
            })))
            .mount(&mock_server)
            .await;

        let provider = provider(&mock_server.uri());
        let result = provider.stream("bad", &request("gpt-4o", false)).await;
        match result {
            Err(ProviderError::Upstream(err)) => {
                assert_eq!(err.kind, UpstreamErrorKind::InvalidCredential);
                assert!(err.message.contains("Incorrect API key"));
            }
            _ => panic!("Expected upstream error"),
        }
    }
}
