//! Line framing for streamed chat responses.
//!
//! Frames follow the data stream protocol understood by the Vercel AI SDK:
//! one frame per line, `<code>:<json>`.

use serde_json::json;

use crate::models::event::FinishReason;
use crate::models::message::{ToolRequest, ToolResponse};

pub const CONTENT_TYPE: &str = "text/event-stream";
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    TextDelta(String),
    ToolCall(ToolRequest),
    ToolResult(ToolResponse),
    /// End of one model invocation within the turn
    StepFinish {
        finish_reason: FinishReason,
        is_continued: bool,
    },
    /// End of the turn
    Finish(FinishReason),
    Error(String),
}

impl StreamFrame {
    pub fn code(&self) -> char {
        match self {
            StreamFrame::TextDelta(_) => '0',
            StreamFrame::Error(_) => '3',
            StreamFrame::ToolCall(_) => '9',
            StreamFrame::ToolResult(_) => 'a',
            StreamFrame::Finish(_) => 'd',
            StreamFrame::StepFinish { .. } => 'e',
        }
    }

    /// Encode as one line, terminator included
    pub fn encode(&self) -> String {
        let payload = match self {
            StreamFrame::TextDelta(text) => json!(text),
            StreamFrame::Error(message) => json!(message),
            StreamFrame::ToolCall(request) => json!({
                "toolCallId": request.id,
                "toolName": request.tool_call.name,
                "args": request.tool_call.arguments,
            }),
            StreamFrame::ToolResult(response) => json!({
                "toolCallId": response.id,
                "result": response.tool_result,
            }),
            StreamFrame::StepFinish {
                finish_reason,
                is_continued,
            } => json!({
                "finishReason": finish_reason,
                "isContinued": is_continued,
            }),
            StreamFrame::Finish(reason) => json!({"finishReason": reason}),
        };
        format!("{}:{}\n", self.code(), payload)
    }
}
