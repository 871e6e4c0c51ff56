use super::role::Role;
use super::tool::ToolCall;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool_result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: ToolCall) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S: Into<String>>(id: S, tool_result: Value) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_result,
        })
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MessageContent::Text(_) => "text",
            MessageContent::ToolRequest(_) => "tool request",
            MessageContent::ToolResponse(_) => "tool response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Self::new(Role::System)
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a new tool result message with the current timestamp
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool request to the message
    pub fn with_tool_request<S: Into<String>>(self, id: S, tool_call: ToolCall) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response<S: Into<String>>(self, id: S, result: Value) -> Self {
        self.with_content(MessageContent::tool_response(id, result))
    }

    /// All text content joined together
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.content.iter().filter_map(|c| c.as_tool_request())
    }

    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResponse> {
        self.content.iter().filter_map(|c| c.as_tool_response())
    }

    /// Checks that the content variants are ones this role may carry.
    ///
    /// System and user messages carry text, assistant messages carry text and
    /// tool requests, tool messages carry tool responses only.
    pub fn check_content(&self) -> Result<(), String> {
        if self.content.is_empty() {
            return Err(format!("{} message has no content", self.role));
        }
        for content in &self.content {
            let allowed = matches!(
                (self.role, content),
                (Role::System, MessageContent::Text(_))
                    | (Role::User, MessageContent::Text(_))
                    | (Role::Assistant, MessageContent::Text(_))
                    | (Role::Assistant, MessageContent::ToolRequest(_))
                    | (Role::Tool, MessageContent::ToolResponse(_))
            );
            if !allowed {
                return Err(format!(
                    "{} message cannot carry {} content",
                    self.role,
                    content.kind()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_content() {
        assert!(Message::user().with_text("hi").check_content().is_ok());
        assert!(Message::assistant()
            .with_text("let me look")
            .with_tool_request("1", ToolCall::new("list_notes", json!({})))
            .check_content()
            .is_ok());
        assert!(Message::tool()
            .with_tool_response("1", json!({"notes": []}))
            .check_content()
            .is_ok());

        let err = Message::system()
            .with_tool_request("1", ToolCall::new("list_notes", json!({})))
            .check_content()
            .unwrap_err();
        assert_eq!(err, "system message cannot carry tool request content");

        assert!(Message::user()
            .with_tool_response("1", json!({}))
            .check_content()
            .is_err());
        assert!(Message::assistant().check_content().is_err());
    }

    #[test]
    fn test_message_serialization() {
        let message = Message::assistant()
            .with_text("Hi")
            .with_tool_request("call_1", ToolCall::new("get_note", json!({"note_id": "n1"})));

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "toolRequest");
        assert_eq!(value["content"][1]["tool_call"]["name"], "get_note");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
