use thiserror::Error;

use super::notes::NotesError;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Argument '{name}' must be of type {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Notes(#[from] NotesError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
