//! Folding a canonical event stream back into messages.
//!
//! The accumulator sees every event of one model invocation and rebuilds the
//! single assistant message it produced. It does no I/O, so the orchestrator
//! can feed it while forwarding the same events to the client.

use std::collections::HashSet;

use crate::models::event::{CanonicalEvent, FinishReason};
use crate::models::message::{Message, MessageContent, ToolRequest};

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: Vec<MessageContent>,
    tool_ids: HashSet<String>,
    finish: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns false when the event was dropped: anything
    /// after the finish, or a tool call reusing an id already seen.
    pub fn push(&mut self, event: &CanonicalEvent) -> bool {
        if self.finish.is_some() {
            return false;
        }

        match event {
            CanonicalEvent::TextDelta(delta) => {
                if let Some(MessageContent::Text(text)) = self.content.last_mut() {
                    text.text.push_str(delta);
                } else {
                    self.content.push(MessageContent::text(delta.clone()));
                }
            }
            CanonicalEvent::ToolCall(request) => {
                if !self.tool_ids.insert(request.id.clone()) {
                    return false;
                }
                self.content.push(MessageContent::ToolRequest(request.clone()));
            }
            CanonicalEvent::Finish(reason) => self.finish = Some(*reason),
        }
        true
    }

    /// Tool calls collected so far, in the order the model emitted them
    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.content.iter().filter_map(|c| c.as_tool_request())
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// The assistant message produced (none when the model said nothing) and
    /// the finish reason, which is `Error` if the stream never reported one
    pub fn finish(self) -> (Vec<Message>, FinishReason) {
        let reason = self.finish.unwrap_or(FinishReason::Error);
        let content: Vec<MessageContent> = self
            .content
            .into_iter()
            .filter(|c| !matches!(c, MessageContent::Text(t) if t.text.is_empty()))
            .collect();

        if content.is_empty() {
            return (Vec::new(), reason);
        }

        let mut message = Message::assistant();
        message.content = content;
        (vec![message], reason)
    }
}

/// Fold a complete event sequence
pub fn accumulate<'a, I>(events: I) -> (Vec<Message>, FinishReason)
where
    I: IntoIterator<Item = &'a CanonicalEvent>,
{
    let mut accumulator = StreamAccumulator::new();
    for event in events {
        accumulator.push(event);
    }
    accumulator.finish()
}
