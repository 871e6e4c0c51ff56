use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use quill::{
    credentials::CallerIdentity,
    models::message::Message,
    models::tool::ToolCall,
    orchestrator::ChatRequest,
    protocol::{StreamFrame, CONTENT_TYPE, DATA_STREAM_HEADER, DATA_STREAM_VERSION},
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Types matching the incoming JSON structure
#[derive(Debug, Deserialize)]
struct ChatBody {
    provider: String,
    model: String,
    #[serde(default)]
    thinking: bool,
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    #[serde(rename = "toolInvocations")]
    tool_invocations: Vec<ToolInvocation>,
    #[serde(default)]
    #[serde(rename = "toolCallId")]
    tool_call_id: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolInvocation {
    state: String,
    #[serde(rename = "toolCallId")]
    tool_call_id: String,
    #[serde(rename = "toolName")]
    tool_name: String,
    #[serde(default)]
    args: Value,
    result: Option<Value>,
}

/// Streams encoded frames using the Vercel AI SDK data stream protocol
pub struct SseResponse {
    rx: ReceiverStream<StreamFrame>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<StreamFrame>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|frame| Ok(Bytes::from(frame.encode()))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (HeaderName::from_static(DATA_STREAM_HEADER), DATA_STREAM_VERSION),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

pub(crate) fn caller_identity(headers: &HeaderMap) -> Result<CallerIdentity, ApiError> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let user_id =
        header_value("x-user-id").ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))?;
    let caller = CallerIdentity::new(user_id);
    Ok(match header_value("x-org-id") {
        Some(org_id) => caller.with_org(org_id),
        None => caller,
    })
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<IncomingMessage>) -> Result<Vec<Message>, ApiError> {
    let mut messages = Vec::new();

    for msg in incoming {
        match msg.role.as_str() {
            "system" => messages.push(Message::system().with_text(msg.content)),
            "user" => messages.push(Message::user().with_text(msg.content)),
            "assistant" => {
                // Completed invocations become one request message followed by a result per call
                let mut request = Message::assistant();
                let mut results = Vec::new();
                for tool in msg.tool_invocations {
                    if tool.state != "result" {
                        tracing::warn!(
                            "Dropping tool invocation {} in state {}",
                            tool.tool_call_id,
                            tool.state
                        );
                        continue;
                    }
                    request = request.with_tool_request(
                        tool.tool_call_id.clone(),
                        ToolCall::new(tool.tool_name, tool.args),
                    );
                    results.push(Message::tool().with_tool_response(
                        tool.tool_call_id,
                        tool.result.unwrap_or(Value::Null),
                    ));
                }
                if !results.is_empty() {
                    messages.push(request);
                    messages.extend(results);
                }

                if !msg.content.is_empty() {
                    messages.push(Message::assistant().with_text(msg.content));
                }
            }
            "tool" => {
                let id = msg.tool_call_id.ok_or_else(|| {
                    ApiError::bad_request("Tool messages must carry a toolCallId")
                })?;
                messages.push(
                    Message::tool().with_tool_response(id, msg.result.unwrap_or(Value::Null)),
                );
            }
            other => return Err(ApiError::bad_request(format!("Unknown role: {}", other))),
        }
    }

    Ok(messages)
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<SseResponse, ApiError> {
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(ApiError::bad_request("Unsupported x-protocol, expected data"));
        }
    }

    let caller = caller_identity(&headers)?;
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let request = ChatRequest {
        provider: body.provider,
        model: body.model,
        thinking: body.thinking,
        messages: convert_messages(body.messages)?,
    };
    let prepared = state.orchestrator.prepare(caller, request).await?;

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    // Conversations are only kept for the debug route
    let conversations = state
        .debug_dir
        .as_ref()
        .map(|_| state.conversations.clone());

    tokio::spawn(async move {
        let user = prepared.caller().user_id.clone();
        match (prepared.run(tx).await, conversations) {
            (Ok(outcome), Some(conversations)) => {
                conversations.record(&user, outcome.messages).await
            }
            (Ok(_), None) => {}
            (Err(e), _) => {
                tracing::debug!(%user, "Turn ended without a conversation to record: {}", e)
            }
        }
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}
