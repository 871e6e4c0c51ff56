use lazy_static::lazy_static;

use crate::models::tool::{ParameterType, Tool};

lazy_static! {
    /// Every tool offered to the model, in the order it is offered
    pub static ref CATALOG: Vec<Tool> = vec![
        Tool::new(
            "list_notebooks",
            "List all notebooks that belong to the user. Use this to find a notebook id before listing its chapters.",
        ),
        Tool::new("create_notebook", "Create a new notebook.")
            .required("name", ParameterType::String, "Name of the notebook")
            .optional("description", ParameterType::String, "Short description of what the notebook is for"),
        Tool::new("list_chapters", "List the chapters of a notebook.")
            .required("notebook_id", ParameterType::String, "Id of the notebook"),
        Tool::new("create_chapter", "Create a chapter inside a notebook.")
            .required("notebook_id", ParameterType::String, "Id of the notebook")
            .required("name", ParameterType::String, "Name of the chapter"),
        Tool::new(
            "list_notes",
            "List the user's notes, most recently updated first. Pass a chapter id to list only the notes of that chapter.",
        )
        .optional("chapter_id", ParameterType::String, "Only list notes in this chapter"),
        Tool::new("get_note", "Get the full title and content of a note.")
            .required("note_id", ParameterType::String, "Id of the note"),
        Tool::new("create_note", "Create a new note. Content is markdown.")
            .required("title", ParameterType::String, "Title of the note")
            .required("content", ParameterType::String, "Markdown content of the note")
            .optional("chapter_id", ParameterType::String, "Chapter to file the note under"),
        Tool::new(
            "update_note",
            "Update the title and/or content of an existing note. Fields that are omitted are left unchanged.",
        )
        .required("note_id", ParameterType::String, "Id of the note")
        .optional("title", ParameterType::String, "New title")
        .optional("content", ParameterType::String, "New markdown content, replacing the old content"),
        Tool::new("delete_note", "Delete a note permanently. Confirm with the user before calling this.")
            .required("note_id", ParameterType::String, "Id of the note"),
        Tool::new("search_notes", "Search the user's notes by words in their title or content.")
            .required("query", ParameterType::String, "Text to search for")
            .optional("limit", ParameterType::Integer, "Maximum number of notes to return, default 10"),
        Tool::new("list_tasks", "List the user's tasks.")
            .optional("include_completed", ParameterType::Boolean, "Also list completed tasks, default false"),
        Tool::new("create_task", "Create a task on the user's todo list.")
            .required("title", ParameterType::String, "What needs to be done")
            .optional("due_date", ParameterType::String, "Due date as YYYY-MM-DD")
            .optional("note_id", ParameterType::String, "Note the task relates to"),
        Tool::new("complete_task", "Mark a task as done.")
            .required("task_id", ParameterType::String, "Id of the task"),
    ];
}

pub fn find(name: &str) -> Option<&'static Tool> {
    CATALOG.iter().find(|tool| tool.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::utils::check_tools;

    #[test]
    fn test_catalog_is_valid_for_every_provider() {
        assert_eq!(CATALOG.len(), 13);
        check_tools(&CATALOG).unwrap();
    }

    #[test]
    fn test_required_arguments_are_declared() {
        for tool in CATALOG.iter() {
            for name in &tool.required {
                assert!(
                    tool.parameters.contains_key(name),
                    "{} requires undeclared {}",
                    tool.name,
                    name
                );
            }
        }
    }

    #[test]
    fn test_find() {
        assert_eq!(find("get_note").unwrap().required, vec!["note_id"]);
        assert!(find("rm_rf").is_none());
    }
}
