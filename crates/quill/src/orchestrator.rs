//! The chat loop.
//!
//! A turn starts with [`ChatOrchestrator::prepare`], which does everything
//! that can fail before the response starts streaming, and continues with
//! [`PreparedChat::run`], which invokes the model, forwards its output as
//! [`StreamFrame`]s, executes requested tools and re-invokes the model until
//! it produces an answer.

use futures::StreamExt;
use indoc::indoc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::accumulator::StreamAccumulator;
use crate::credentials::{CallerIdentity, CredentialResolver};
use crate::errors::{ChatError, ChatResult};
use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::message::{Message, ToolRequest, ToolResponse};
use crate::models::role::Role;
use crate::models::tool::Tool;
use crate::protocol::StreamFrame;
use crate::providers::{CompletionRequest, Provider, ProviderName, ProviderRegistry};
use crate::tools::ToolExecutor;

pub const DEFAULT_SYSTEM_PROMPT: &str = indoc! {"
    You are Quill, an assistant built into a notes app. You help the user
    find, write, organize and act on their notes, notebooks, chapters and
    tasks.

    Use the available tools to read and change the user's data rather than
    guessing. Look up ids with the list and search tools before using them.
    Confirm with the user before deleting anything. Answer in markdown and
    keep answers short unless the user asks for detail.
"};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);

/// Limits applied to every turn
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Model invocations allowed per turn
    pub max_iterations: usize,
    /// Wall-clock limit for the whole turn, tool execution included
    pub turn_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }
}

/// One chat request as the client sent it
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub thinking: bool,
    pub messages: Vec<Message>,
}

/// The result of a completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    /// The whole conversation, default system prompt and new messages included
    pub messages: Vec<Message>,
    pub finish_reason: FinishReason,
    /// Number of model invocations made
    pub iterations: usize,
}

/// Put the default system prompt first unless the conversation already starts
/// with a system message
pub fn ensure_system_prompt(mut messages: Vec<Message>) -> Vec<Message> {
    if messages.first().map(|m| m.role) != Some(Role::System) {
        messages.insert(0, Message::system().with_text(DEFAULT_SYSTEM_PROMPT));
    }
    messages
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    providers: ProviderRegistry,
    credentials: Arc<dyn CredentialResolver>,
    tools: Arc<dyn ToolExecutor>,
    config: OrchestratorConfig,
}

impl ChatOrchestrator {
    pub fn new(
        providers: ProviderRegistry,
        credentials: Arc<dyn CredentialResolver>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            providers,
            credentials,
            tools,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate the request and resolve everything the turn needs. Nothing is
    /// sent upstream here, so every error can still be reported as a plain
    /// HTTP error.
    pub async fn prepare(
        &self,
        caller: CallerIdentity,
        request: ChatRequest,
    ) -> ChatResult<PreparedChat> {
        let name = ProviderName::from_str(&request.provider)
            .map_err(|_| ChatError::Validation(format!("Unknown provider: {}", request.provider)))?;
        if request.model.trim().is_empty() {
            return Err(ChatError::Validation("model must not be empty".to_string()));
        }
        if request.messages.is_empty() {
            return Err(ChatError::Validation("messages must not be empty".to_string()));
        }
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| ChatError::Validation(format!("Provider {} is not available", name)))?;

        let api_key = self.credentials.resolve(&caller, name).await?;

        // A history the provider cannot express must fail before any byte is streamed
        let messages = ensure_system_prompt(request.messages);
        provider.translate(&CompletionRequest {
            model: request.model.clone(),
            thinking: request.thinking,
            messages: messages.clone(),
            tools: self.tools.tools(),
        })?;

        Ok(PreparedChat {
            provider,
            api_key,
            caller,
            model: request.model,
            thinking: request.thinking,
            messages,
            tools: Arc::clone(&self.tools),
            config: self.config.clone(),
        })
    }
}

/// A validated turn, ready to run
pub struct PreparedChat {
    provider: Arc<dyn Provider>,
    api_key: String,
    caller: CallerIdentity,
    model: String,
    thinking: bool,
    messages: Vec<Message>,
    tools: Arc<dyn ToolExecutor>,
    config: OrchestratorConfig,
}

impl PreparedChat {
    pub fn provider(&self) -> ProviderName {
        self.provider.name()
    }

    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Run the turn, writing frames to `sink` as output is produced. Once
    /// this is called every failure is also reported in-band, as an error
    /// frame followed by an error finish frame.
    pub async fn run(self, sink: mpsc::Sender<StreamFrame>) -> ChatResult<ChatOutcome> {
        let provider = self.provider.name();
        let user = self.caller.user_id.clone();
        let timeout = self.config.turn_timeout;
        let mut messages = self.messages.clone();

        let result = match tokio::time::timeout(timeout, self.turn(&mut messages, &sink)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(timeout)),
        };

        match result {
            Ok((finish_reason, iterations)) => {
                info!(%provider, %user, %finish_reason, iterations, "Chat turn complete");
                send(&sink, StreamFrame::Finish(finish_reason)).await?;
                Ok(ChatOutcome {
                    messages,
                    finish_reason,
                    iterations,
                })
            }
            Err(ChatError::ClientDisconnected) => {
                debug!(%provider, %user, "Client went away, turn abandoned");
                Err(ChatError::ClientDisconnected)
            }
            Err(e) => {
                error!(%provider, %user, "Chat turn failed: {}", e);
                // the client may already be gone
                let _ = sink.send(StreamFrame::Error(e.user_message())).await;
                let _ = sink.send(StreamFrame::Finish(FinishReason::Error)).await;
                Err(e)
            }
        }
    }

    async fn turn(
        &self,
        messages: &mut Vec<Message>,
        sink: &mpsc::Sender<StreamFrame>,
    ) -> ChatResult<(FinishReason, usize)> {
        let tools: Vec<Tool> = self.tools.tools();
        let mut iterations = 0;

        loop {
            iterations += 1;
            let request = CompletionRequest {
                model: self.model.clone(),
                thinking: self.thinking,
                messages: messages.clone(),
                tools: tools.clone(),
            };
            debug!(
                provider = %self.provider.name(),
                model = %self.model,
                iteration = iterations,
                messages = messages.len(),
                "Invoking model"
            );

            let mut stream = self.provider.stream(&self.api_key, &request).await?;
            let mut accumulator = StreamAccumulator::new();
            while let Some(event) = stream.next().await {
                let event = event.map_err(ChatError::Upstream)?;
                if !accumulator.push(&event) {
                    continue;
                }
                match event {
                    CanonicalEvent::TextDelta(text) => send(sink, StreamFrame::TextDelta(text)).await?,
                    CanonicalEvent::ToolCall(request) => {
                        send(sink, StreamFrame::ToolCall(request)).await?
                    }
                    CanonicalEvent::Finish(_) => break,
                }
            }
            drop(stream);

            let requests: Vec<ToolRequest> = accumulator.tool_requests().cloned().collect();
            let (produced, finish_reason) = accumulator.finish();
            messages.extend(produced);
            send(
                sink,
                StreamFrame::StepFinish {
                    finish_reason,
                    is_continued: false,
                },
            )
            .await?;

            if finish_reason != FinishReason::ToolCalls || requests.is_empty() {
                return Ok((finish_reason, iterations));
            }
            if iterations >= self.config.max_iterations {
                return Err(ChatError::IterationLimit(self.config.max_iterations));
            }

            for request in requests {
                if sink.is_closed() {
                    return Err(ChatError::ClientDisconnected);
                }
                debug!(tool = %request.tool_call.name, id = %request.id, "Executing tool call");
                let result = self.tools.execute(&self.caller, &request.tool_call).await;
                send(
                    sink,
                    StreamFrame::ToolResult(ToolResponse {
                        id: request.id.clone(),
                        tool_result: result.clone(),
                    }),
                )
                .await?;
                messages.push(Message::tool().with_tool_response(request.id, result));
            }
        }
    }
}

async fn send(sink: &mpsc::Sender<StreamFrame>, frame: StreamFrame) -> ChatResult<()> {
    sink.send(frame)
        .await
        .map_err(|_| ChatError::ClientDisconnected)
}
