use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::catalog;
use super::error::{ToolError, ToolResult};
use super::notes::{NewTask, NoteUpdate, NotesStore};
use crate::credentials::CallerIdentity;
use crate::models::tool::{Tool, ToolCall};

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Runs tool calls on behalf of a caller. Failures come back as
/// `{"error": ...}` results so the model can react to them.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools to offer the model
    fn tools(&self) -> Vec<Tool>;

    async fn execute(&self, caller: &CallerIdentity, call: &ToolCall) -> Value;
}

/// Executes the notes catalog against a [`NotesStore`]
pub struct CatalogToolExecutor<S: NotesStore> {
    store: Arc<S>,
}

impl<S: NotesStore> CatalogToolExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn dispatch(&self, caller: &CallerIdentity, call: &ToolCall) -> ToolResult<Value> {
        let tool =
            catalog::find(&call.name).ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        let args = validate(tool, &call.arguments)?;
        let owner = caller.user_id.as_str();
        let store = self.store.as_ref();

        match tool.name.as_str() {
            "list_notebooks" => to_json(json!({"notebooks": store.list_notebooks(owner).await?})),
            "create_notebook" => to_json(
                store
                    .create_notebook(owner, str_arg(args, "name")?, opt_str(args, "description"))
                    .await?,
            ),
            "list_chapters" => to_json(json!({
                "chapters": store.list_chapters(owner, str_arg(args, "notebook_id")?).await?
            })),
            "create_chapter" => to_json(
                store
                    .create_chapter(owner, str_arg(args, "notebook_id")?, str_arg(args, "name")?)
                    .await?,
            ),
            "list_notes" => to_json(json!({
                "notes": store.list_notes(owner, opt_str(args, "chapter_id")).await?
            })),
            "get_note" => to_json(store.get_note(owner, str_arg(args, "note_id")?).await?),
            "create_note" => to_json(
                store
                    .create_note(
                        owner,
                        str_arg(args, "title")?,
                        str_arg(args, "content")?,
                        opt_str(args, "chapter_id"),
                    )
                    .await?,
            ),
            "update_note" => {
                let update = NoteUpdate {
                    title: opt_str(args, "title").map(String::from),
                    content: opt_str(args, "content").map(String::from),
                };
                to_json(
                    store
                        .update_note(owner, str_arg(args, "note_id")?, update)
                        .await?,
                )
            }
            "delete_note" => {
                let note_id = str_arg(args, "note_id")?;
                store.delete_note(owner, note_id).await?;
                Ok(json!({"deleted": note_id}))
            }
            "search_notes" => {
                let limit = match args.get("limit").and_then(Value::as_u64) {
                    Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
                    None => DEFAULT_SEARCH_LIMIT,
                };
                to_json(json!({
                    "notes": store.search_notes(owner, str_arg(args, "query")?, limit).await?
                }))
            }
            "list_tasks" => {
                let include_completed = args
                    .get("include_completed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                to_json(json!({"tasks": store.list_tasks(owner, include_completed).await?}))
            }
            "create_task" => {
                let task = NewTask {
                    title: str_arg(args, "title")?.to_string(),
                    due_date: opt_str(args, "due_date").map(String::from),
                    note_id: opt_str(args, "note_id").map(String::from),
                };
                to_json(store.create_task(owner, task).await?)
            }
            "complete_task" => to_json(store.complete_task(owner, str_arg(args, "task_id")?).await?),
            // catalog entries without a handler
            other => Err(ToolError::Internal(format!("No handler for tool {}", other))),
        }
    }
}

#[async_trait]
impl<S: NotesStore + 'static> ToolExecutor for CatalogToolExecutor<S> {
    fn tools(&self) -> Vec<Tool> {
        catalog::CATALOG.clone()
    }

    async fn execute(&self, caller: &CallerIdentity, call: &ToolCall) -> Value {
        match self.dispatch(caller, call).await {
            Ok(result) => {
                debug!(tool = %call.name, user = %caller.user_id, "Tool call succeeded");
                result
            }
            Err(e) => {
                warn!(tool = %call.name, user = %caller.user_id, "Tool call failed: {}", e);
                json!({"error": e.to_string()})
            }
        }
    }
}

/// Structural checks only: an argument object, required fields present and
/// non-null, declared fields of the declared type
fn validate<'a>(tool: &Tool, arguments: &'a Value) -> ToolResult<&'a Map<String, Value>> {
    let args = arguments.as_object().ok_or_else(|| {
        ToolError::InvalidParameters(format!(
            "arguments for {} must be a JSON object",
            tool.name
        ))
    })?;

    for name in &tool.required {
        if args.get(name).map_or(true, Value::is_null) {
            return Err(ToolError::MissingArgument(name.clone()));
        }
    }

    for (name, value) in args {
        if value.is_null() {
            continue;
        }
        if let Some(param) = tool.parameters.get(name) {
            if !param.kind.matches(value) {
                return Err(ToolError::WrongType {
                    name: name.clone(),
                    expected: param.kind.as_str(),
                });
            }
        }
    }

    Ok(args)
}

fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> ToolResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::MissingArgument(name.to_string()))
}

fn opt_str<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn to_json<T: Serialize>(value: T) -> ToolResult<Value> {
    serde_json::to_value(value).map_err(|e| ToolError::Internal(e.to_string()))
}
