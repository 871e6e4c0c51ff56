use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::errors::{ProviderResult, UpstreamError};
use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::tool::ToolCall;
use crate::providers::base::{CompletionRequest, EventStream, Provider, ProviderName, Translated};

/// One scripted model invocation
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Stream these items in order
    Events(Vec<Result<CanonicalEvent, UpstreamError>>),
    /// Fail before any event is produced, as an HTTP error would
    Reject(UpstreamError),
    /// Never produce anything
    Stall,
}

impl MockTurn {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MockTurn::Events(vec![
            Ok(CanonicalEvent::TextDelta(text.into())),
            Ok(CanonicalEvent::Finish(FinishReason::Stop)),
        ])
    }

    pub fn tool_calls(calls: Vec<(&str, ToolCall)>) -> Self {
        let mut events: Vec<_> = calls
            .into_iter()
            .map(|(id, call)| Ok(CanonicalEvent::tool_call(id, call)))
            .collect();
        events.push(Ok(CanonicalEvent::Finish(FinishReason::ToolCalls)));
        MockTurn::Events(events)
    }
}

/// A mock provider that plays back pre-configured turns and records what it was asked
pub struct MockProvider {
    name: ProviderName,
    turns: Arc<Mutex<VecDeque<MockTurn>>>,
    requests: Arc<Mutex<Vec<(String, CompletionRequest)>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of turns
    pub fn new(name: ProviderName, turns: Vec<MockTurn>) -> Self {
        Self {
            name,
            turns: Arc::new(Mutex::new(turns.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received so far, with the API key it was sent with
    pub fn requests(&self) -> Vec<(String, CompletionRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn translate(&self, request: &CompletionRequest) -> ProviderResult<Translated> {
        Ok(Translated::new(json!({
            "model": request.model,
            "messages": request.messages.len(),
            "tools": request.tools.len(),
        })))
    }

    async fn stream(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> ProviderResult<EventStream> {
        self.requests
            .lock()
            .unwrap()
            .push((api_key.to_string(), request.clone()));

        // Finish immediately once the script runs out
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockTurn::Events(vec![Ok(CanonicalEvent::Finish(
                FinishReason::Stop,
            ))]));

        match turn {
            MockTurn::Events(events) => Ok(Box::pin(stream::iter(events))),
            MockTurn::Reject(err) => Err(err.into()),
            MockTurn::Stall => Ok(Box::pin(stream::pending::<
                Result<CanonicalEvent, UpstreamError>,
            >())),
        }
    }
}
