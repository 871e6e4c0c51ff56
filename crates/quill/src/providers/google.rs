use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::base::{CompletionRequest, EventStream, Provider, ProviderName, Translated};
use super::configs::GoogleProviderConfig;
use super::sse::{self, SseEvent, StreamDecoder};
use super::utils::{self, kind_from_status};
use crate::errors::{ProviderError, ProviderResult, UpstreamError, UpstreamErrorKind};
use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const THINKING_BUDGET: i32 = 4096;

const THINKING_PREFIXES: [&str; 2] = ["gemini-2.5", "gemini-3"];

pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: utils::http_client()?,
            config,
        })
    }

    fn supports_thinking(model: &str) -> bool {
        THINKING_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Google
    }

    fn translate(&self, request: &CompletionRequest) -> ProviderResult<Translated> {
        utils::check_messages(&request.messages)?;
        let (system, rest) = utils::split_system(&request.messages)?;
        let mut warnings = Vec::new();

        let mut payload = json!({
            "contents": messages_to_google_spec(rest)?,
        });

        if let Some(system) = system {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let tools = tools_to_google_spec(&request.tools)?;
        if !tools.is_empty() {
            payload["tools"] = json!([{"functionDeclarations": tools}]);
        }

        let mut generation = Map::new();
        if let Some(temp) = self.config.temperature {
            generation.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = self.config.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if request.thinking {
            if Self::supports_thinking(&request.model) {
                generation.insert(
                    "thinkingConfig".to_string(),
                    json!({"thinkingBudget": THINKING_BUDGET}),
                );
            } else {
                warnings.push(format!(
                    "model {} does not support thinking, thinking ignored",
                    request.model
                ));
            }
        }
        if !generation.is_empty() {
            payload["generationConfig"] = Value::Object(generation);
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
            warn!(provider = "google", "{}", warning);
        }

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.host.trim_end_matches('/'),
            request.model
        );
        debug!(model = %request.model, messages = request.messages.len(), "Google streaming request");

        let response = utils::send(
            self.client
                .post(&url)
                .query(&[("alt", "sse")])
                .header("x-goog-api-key", api_key)
                .json(&translated.payload),
            classify_error,
        )
        .await?;

        Ok(sse::decode(response, GoogleStreamDecoder::default()))
    }
}

/// Convert non-system messages to Gemini contents. Function responses carry the
/// tool name, which is looked up from the request with the same id.
pub fn messages_to_google_spec(messages: &[Message]) -> ProviderResult<Vec<Value>> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut contents: Vec<Value> = Vec::new();
    let mut pending_responses: Vec<Value> = Vec::new();

    for message in messages {
        if message.role != Role::Tool && !pending_responses.is_empty() {
            contents.push(json!({"role": "user", "parts": std::mem::take(&mut pending_responses)}));
        }

        match message.role {
            Role::User => {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .map(|text| json!({"text": text}))
                    .collect();
                contents.push(json!({"role": "user", "parts": parts}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                for content in &message.content {
                    match content {
                        MessageContent::Text(text) if !text.text.is_empty() => {
                            parts.push(json!({"text": text.text}));
                        }
                        MessageContent::ToolRequest(request) => {
                            names.insert(&request.id, &request.tool_call.name);
                            let args = if request.tool_call.arguments.is_object() {
                                request.tool_call.arguments.clone()
                            } else {
                                json!({})
                            };
                            parts.push(json!({
                                "functionCall": {"name": request.tool_call.name, "args": args}
                            }));
                        }
                        _ => {}
                    }
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {
                for response in message.tool_responses() {
                    let name = names.get(response.id.as_str()).ok_or_else(|| {
                        ProviderError::Translation(format!(
                            "Tool response {} has no matching tool request",
                            response.id
                        ))
                    })?;
                    let result = match &response.tool_result {
                        Value::Object(_) => response.tool_result.clone(),
                        other => json!({"result": other}),
                    };
                    pending_responses.push(json!({
                        "functionResponse": {"name": name, "response": result}
                    }));
                }
            }
            Role::System => {
                return Err(ProviderError::Translation(
                    "system messages must be passed as the system instruction".to_string(),
                ))
            }
        }
    }

    if !pending_responses.is_empty() {
        contents.push(json!({"role": "user", "parts": pending_responses}));
    }

    Ok(contents)
}

pub fn tools_to_google_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    utils::check_tools(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            let mut declaration = json!({
                "name": tool.name,
                "description": tool.description,
            });
            // Gemini rejects object schemas without properties
            if !tool.parameters.is_empty() {
                declaration["parameters"] = tool.input_schema();
            }
            declaration
        })
        .collect())
}

fn status_kind(status: &str) -> Option<UpstreamErrorKind> {
    match status {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => Some(UpstreamErrorKind::InvalidCredential),
        "RESOURCE_EXHAUSTED" => Some(UpstreamErrorKind::RateLimited),
        "NOT_FOUND" | "UNAVAILABLE" => Some(UpstreamErrorKind::ModelUnavailable),
        _ => None,
    }
}

fn error_kind(error: &Value) -> Option<UpstreamErrorKind> {
    let details: Vec<&Value> = error["details"].as_array().into_iter().flatten().collect();
    // an invalid key comes back as INVALID_ARGUMENT with a structured reason
    if details.iter().any(|d| d["reason"] == "API_KEY_INVALID") {
        return Some(UpstreamErrorKind::InvalidCredential);
    }
    let kind = error["status"].as_str().and_then(status_kind)?;
    let quota_failure = details
        .iter()
        .any(|d| d["@type"] == "type.googleapis.com/google.rpc.QuotaFailure");
    if kind == UpstreamErrorKind::RateLimited && quota_failure {
        return Some(UpstreamErrorKind::QuotaExceeded);
    }
    Some(kind)
}

pub fn classify_error(status: StatusCode, body: &Value) -> UpstreamErrorKind {
    let body = match body {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    error_kind(&body["error"]).unwrap_or_else(|| kind_from_status(status))
}

fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        _ => FinishReason::Error,
    }
}

/// Decodes streamGenerateContent chunks. Gemini has no tool-call finish
/// reason, so the finish is produced once the body ends.
#[derive(Debug, Default)]
pub struct GoogleStreamDecoder {
    saw_function_call: bool,
    finish_reason: Option<FinishReason>,
}

impl StreamDecoder for GoogleStreamDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<CanonicalEvent>, UpstreamError> {
        let data: Value = serde_json::from_str(&event.data)
            .map_err(|e| UpstreamError::generic(format!("Invalid Gemini chunk: {}", e)))?;

        if data.get("error").is_some() {
            let kind = error_kind(&data["error"]).unwrap_or(UpstreamErrorKind::Generic);
            let message = data["error"]["message"].as_str().unwrap_or("stream error");
            return Err(UpstreamError::new(kind, message));
        }

        if data["promptFeedback"]["blockReason"].is_string() {
            self.finish_reason = Some(FinishReason::Error);
            return Ok(Vec::new());
        }

        let candidate = &data["candidates"][0];
        let mut out = Vec::new();
        for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
            if part["thought"].as_bool().unwrap_or(false) {
                continue;
            }
            if let Some(text) = part["text"].as_str().filter(|t| !t.is_empty()) {
                out.push(CanonicalEvent::text(text));
            }
            if let Some(call) = part.get("functionCall") {
                self.saw_function_call = true;
                let args = match call.get("args") {
                    Some(args) if !args.is_null() => args.clone(),
                    _ => json!({}),
                };
                out.push(CanonicalEvent::tool_call(
                    format!("call_{}", Uuid::new_v4()),
                    ToolCall::new(call["name"].as_str().unwrap_or_default(), args),
                ));
            }
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            self.finish_reason = Some(finish_reason(reason));
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<CanonicalEvent> {
        let reason = match self.finish_reason {
            Some(FinishReason::Stop) if self.saw_function_call => FinishReason::ToolCalls,
            Some(reason) => reason,
            None => FinishReason::Error,
        };
        vec![CanonicalEvent::Finish(reason)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ParameterType;
    use crate::providers::sse::decode_all;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(host: &str) -> GoogleProvider {
        GoogleProvider::new(GoogleProviderConfig {
            host: host.to_string(),
            temperature: None,
            max_tokens: Some(1024),
        })
        .unwrap()
    }

    fn request(model: &str, thinking: bool, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            thinking,
            messages,
            tools: vec![],
        }
    }

    fn chunk(data: Value) -> SseEvent {
        SseEvent::data(data.to_string())
    }

    #[test]
    fn test_function_response_uses_request_name() -> ProviderResult<()> {
        let contents = messages_to_google_spec(&[
            Message::user().with_text("Find my notes"),
            Message::assistant()
                .with_tool_request("call_1", ToolCall::new("search_notes", json!({"query": "rust"})))
                .with_tool_request("call_2", ToolCall::new("list_notes", json!({}))),
            Message::tool().with_tool_response("call_1", json!({"notes": []})),
            Message::tool().with_tool_response("call_2", json!("plain text")),
        ])?;

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "search_notes");
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["name"], "search_notes");
        assert_eq!(parts[1]["functionResponse"]["name"], "list_notes");
        assert_eq!(parts[1]["functionResponse"]["response"]["result"], "plain text");
        Ok(())
    }

    #[test]
    fn test_orphan_function_response_fails() {
        let result = messages_to_google_spec(&[
            Message::user().with_text("Hi"),
            Message::tool().with_tool_response("missing", json!({})),
        ]);
        assert!(matches!(result, Err(ProviderError::Translation(_))));
    }

    #[test]
    fn test_translate_system_tools_and_thinking() -> ProviderResult<()> {
        let mut req = request(
            "gemini-2.5-flash",
            true,
            vec![
                Message::system().with_text("Be brief."),
                Message::user().with_text("Hi"),
            ],
        );
        req.tools = vec![
            Tool::new("list_notes", "List notes"),
            Tool::new("get_note", "Get a note").required("note_id", ParameterType::String, "Note id"),
        ];
        let translated = provider("http://localhost").translate(&req)?;
        let payload = &translated.payload;

        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "Be brief.");
        let declarations = &payload["tools"][0]["functionDeclarations"];
        assert!(declarations[0].get("parameters").is_none());
        assert_eq!(declarations[1]["parameters"]["required"], json!(["note_id"]));
        assert_eq!(
            payload["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            THINKING_BUDGET
        );
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 1024);
        assert!(translated.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn test_thinking_unsupported_model() -> ProviderResult<()> {
        let translated = provider("http://localhost").translate(&request(
            "gemini-1.5-pro",
            true,
            vec![Message::user().with_text("Hi")],
        ))?;
        assert!(translated.payload["generationConfig"]
            .get("thinkingConfig")
            .is_none());
        assert_eq!(translated.warnings.len(), 1);
        Ok(())
    }

    #[test]
    fn test_decoder_function_call_finishes_with_tool_calls() {
        let events = decode_all(
            GoogleStreamDecoder::default(),
            &[
                chunk(json!({"candidates": [{"content": {"role": "model", "parts": [
                    {"text": "Searching"},
                    {"functionCall": {"name": "search_notes", "args": {"query": "rust"}}}
                ]}, "finishReason": "STOP"}]})),
            ],
        )
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], CanonicalEvent::text("Searching"));
        match &events[1] {
            CanonicalEvent::ToolCall(request) => {
                assert!(request.id.starts_with("call_"));
                assert_eq!(request.tool_call.name, "search_notes");
                assert_eq!(request.tool_call.arguments, json!({"query": "rust"}));
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
        assert_eq!(events[2], CanonicalEvent::Finish(FinishReason::ToolCalls));
    }

    #[test]
    fn test_decoder_text_stop_and_thoughts() {
        let events = decode_all(
            GoogleStreamDecoder::default(),
            &[
                chunk(json!({"candidates": [{"content": {"parts": [
                    {"text": "pondering", "thought": true}
                ]}}]})),
                chunk(json!({"candidates": [{"content": {"parts": [{"text": "Hello"}]}}]})),
                chunk(json!({"candidates": [{"content": {"parts": [{"text": " there"}]},
                    "finishReason": "STOP"}]})),
            ],
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                CanonicalEvent::text("Hello"),
                CanonicalEvent::text(" there"),
                CanonicalEvent::Finish(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn test_decoder_safety_and_missing_reason() {
        let events = decode_all(
            GoogleStreamDecoder::default(),
            &[chunk(json!({"candidates": [{"finishReason": "SAFETY"}]}))],
        )
        .unwrap();
        assert_eq!(events, vec![CanonicalEvent::Finish(FinishReason::Error)]);

        let events = decode_all(
            GoogleStreamDecoder::default(),
            &[chunk(json!({"candidates": [{"content": {"parts": [{"text": "cut"}]}}]}))],
        )
        .unwrap();
        assert_eq!(events.last(), Some(&CanonicalEvent::Finish(FinishReason::Error)));
    }

    #[test]
    fn test_classify_error() {
        let body = json!({"error": {"code": 400, "message": "API key not valid.",
            "status": "INVALID_ARGUMENT",
            "details": [{"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "API_KEY_INVALID"}]}});
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, &body),
            UpstreamErrorKind::InvalidCredential
        );

        let body = json!([{"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}]);
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, &body),
            UpstreamErrorKind::RateLimited
        );

        let body = json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED",
            "details": [{"@type": "type.googleapis.com/google.rpc.QuotaFailure", "violations": []}]}});
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, &body),
            UpstreamErrorKind::QuotaExceeded
        );

        let body = json!({"error": {"code": 400, "message": "bad", "status": "INVALID_ARGUMENT"}});
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, &body),
            UpstreamErrorKind::Generic
        );
    }

    #[tokio::test]
    async fn test_stream_over_http() -> anyhow::Result<()> {
        let body = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hi"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "!"}]},
                "finishReason": "STOP"}]}),
        ]
        .iter()
        .map(|data| format!("data: {}\r\n\r\n", data))
        .collect::<String>();

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = provider(&mock_server.uri());
        let stream = provider
            .stream(
                "test_api_key",
                &request("gemini-2.0-flash", false, vec![Message::user().with_text("Hello?")]),
            )
            .await?;
        let events: Result<Vec<_>, _> = stream.collect::<Vec<_>>().await.into_iter().collect();

        assert_eq!(
            events?,
            vec![
                CanonicalEvent::text("Hi"),
                CanonicalEvent::text("!"),
                CanonicalEvent::Finish(FinishReason::Stop),
            ]
        );
        Ok(())
    }
}
