use serde::{Deserialize, Serialize};

use super::message::ToolRequest;

/// Why a single model invocation stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider-agnostic unit produced by every provider adapter
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    TextDelta(String),
    ToolCall(ToolRequest),
    Finish(FinishReason),
}

impl CanonicalEvent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        CanonicalEvent::TextDelta(text.into())
    }

    pub fn tool_call<S: Into<String>>(id: S, tool_call: crate::models::tool::ToolCall) -> Self {
        CanonicalEvent::ToolCall(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }
}
