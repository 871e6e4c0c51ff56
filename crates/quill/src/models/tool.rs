use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// The JSON type of a single tool argument
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
        }
    }

    /// Structural check of a JSON value against this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub description: String,
}

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does, written for the model
    pub description: String,
    /// Names of the arguments that must be present
    pub required: Vec<String>,
    /// Every argument the tool accepts
    pub parameters: BTreeMap<String, Parameter>,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            required: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Declare an argument the caller must provide
    pub fn required(mut self, name: &str, kind: ParameterType, description: &str) -> Self {
        self.required.push(name.to_string());
        self.optional(name, kind, description)
    }

    /// Declare an argument the caller may provide
    pub fn optional(mut self, name: &str, kind: ParameterType, description: &str) -> Self {
        self.parameters.insert(
            name.to_string(),
            Parameter {
                kind,
                description: description.to_string(),
            },
        );
        self
    }

    /// The JSON-schema object describing the arguments, shared by every provider
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, param)| {
                (
                    name.clone(),
                    json!({
                        "type": param.kind.as_str(),
                        "description": param.description,
                    }),
                )
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// A tool call request emitted by a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new ToolCall with the given name and arguments
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_schema() {
        let tool = Tool::new("get_note", "Fetch a note")
            .required("note_id", ParameterType::String, "The note id")
            .optional("include_body", ParameterType::Boolean, "Return the body too");

        let schema = tool.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["note_id"]));
        assert_eq!(schema["properties"]["note_id"]["type"], "string");
        assert_eq!(schema["properties"]["include_body"]["type"], "boolean");
    }

    #[test]
    fn test_parameter_type_matches() {
        assert!(ParameterType::Integer.matches(&json!(3)));
        assert!(!ParameterType::Integer.matches(&json!(3.5)));
        assert!(!ParameterType::String.matches(&json!(3)));
        assert!(ParameterType::Boolean.matches(&json!(false)));
    }
}
