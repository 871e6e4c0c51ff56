//! The notes domain the tools operate on.
//!
//! [`NotesStore`] is the boundary to whatever persists notebooks, chapters,
//! notes and tasks. Every operation is scoped to the owning user.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotesError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type NotesResult<T> = Result<T, NotesError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub notebook_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub chapter_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub note_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub due_date: Option<String>,
    pub note_id: Option<String>,
}

#[async_trait]
pub trait NotesStore: Send + Sync {
    async fn list_notebooks(&self, owner: &str) -> NotesResult<Vec<Notebook>>;

    async fn create_notebook(
        &self,
        owner: &str,
        name: &str,
        description: Option<&str>,
    ) -> NotesResult<Notebook>;

    async fn list_chapters(&self, owner: &str, notebook_id: &str) -> NotesResult<Vec<Chapter>>;

    async fn create_chapter(&self, owner: &str, notebook_id: &str, name: &str)
        -> NotesResult<Chapter>;

    /// Notes ordered by most recent update first
    async fn list_notes(&self, owner: &str, chapter_id: Option<&str>) -> NotesResult<Vec<Note>>;

    async fn get_note(&self, owner: &str, note_id: &str) -> NotesResult<Note>;

    async fn create_note(
        &self,
        owner: &str,
        title: &str,
        content: &str,
        chapter_id: Option<&str>,
    ) -> NotesResult<Note>;

    async fn update_note(&self, owner: &str, note_id: &str, update: NoteUpdate)
        -> NotesResult<Note>;

    async fn delete_note(&self, owner: &str, note_id: &str) -> NotesResult<()>;

    async fn search_notes(&self, owner: &str, query: &str, limit: usize)
        -> NotesResult<Vec<Note>>;

    async fn list_tasks(&self, owner: &str, include_completed: bool) -> NotesResult<Vec<Task>>;

    async fn create_task(&self, owner: &str, task: NewTask) -> NotesResult<Task>;

    async fn complete_task(&self, owner: &str, task_id: &str) -> NotesResult<Task>;
}

#[derive(Debug, Clone)]
struct Owned<T> {
    owner: String,
    item: T,
}

#[derive(Debug, Default)]
struct Tables {
    notebooks: HashMap<String, Owned<Notebook>>,
    chapters: HashMap<String, Owned<Chapter>>,
    notes: HashMap<String, Owned<Note>>,
    tasks: HashMap<String, Owned<Task>>,
}

fn owned_by<'a, T>(
    table: &'a HashMap<String, Owned<T>>,
    owner: &str,
    kind: &'static str,
    id: &str,
) -> NotesResult<&'a T> {
    table
        .get(id)
        .filter(|row| row.owner == owner)
        .map(|row| &row.item)
        .ok_or_else(|| NotesError::NotFound {
            kind,
            id: id.to_string(),
        })
}

fn non_empty<'a>(field: &str, value: &'a str) -> NotesResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(NotesError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(value)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// In-process store, used when no database is wired in
#[derive(Debug, Default)]
pub struct MemoryNotesStore {
    tables: RwLock<Tables>,
}

impl MemoryNotesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotesStore for MemoryNotesStore {
    async fn list_notebooks(&self, owner: &str) -> NotesResult<Vec<Notebook>> {
        let tables = self.tables.read().await;
        let mut notebooks: Vec<Notebook> = tables
            .notebooks
            .values()
            .filter(|row| row.owner == owner)
            .map(|row| row.item.clone())
            .collect();
        notebooks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(notebooks)
    }

    async fn create_notebook(
        &self,
        owner: &str,
        name: &str,
        description: Option<&str>,
    ) -> NotesResult<Notebook> {
        let notebook = Notebook {
            id: new_id(),
            name: non_empty("name", name)?.to_string(),
            description: description.map(String::from),
            created_at: Utc::now(),
        };
        self.tables.write().await.notebooks.insert(
            notebook.id.clone(),
            Owned {
                owner: owner.to_string(),
                item: notebook.clone(),
            },
        );
        Ok(notebook)
    }

    async fn list_chapters(&self, owner: &str, notebook_id: &str) -> NotesResult<Vec<Chapter>> {
        let tables = self.tables.read().await;
        owned_by(&tables.notebooks, owner, "Notebook", notebook_id)?;
        let mut chapters: Vec<Chapter> = tables
            .chapters
            .values()
            .filter(|row| row.owner == owner && row.item.notebook_id == notebook_id)
            .map(|row| row.item.clone())
            .collect();
        chapters.sort_by_key(|c| c.created_at);
        Ok(chapters)
    }

    async fn create_chapter(
        &self,
        owner: &str,
        notebook_id: &str,
        name: &str,
    ) -> NotesResult<Chapter> {
        let mut tables = self.tables.write().await;
        owned_by(&tables.notebooks, owner, "Notebook", notebook_id)?;
        let chapter = Chapter {
            id: new_id(),
            notebook_id: notebook_id.to_string(),
            name: non_empty("name", name)?.to_string(),
            created_at: Utc::now(),
        };
        tables.chapters.insert(
            chapter.id.clone(),
            Owned {
                owner: owner.to_string(),
                item: chapter.clone(),
            },
        );
        Ok(chapter)
    }

    async fn list_notes(&self, owner: &str, chapter_id: Option<&str>) -> NotesResult<Vec<Note>> {
        let tables = self.tables.read().await;
        if let Some(chapter_id) = chapter_id {
            owned_by(&tables.chapters, owner, "Chapter", chapter_id)?;
        }
        let mut notes: Vec<Note> = tables
            .notes
            .values()
            .filter(|row| row.owner == owner)
            .filter(|row| chapter_id.is_none() || row.item.chapter_id.as_deref() == chapter_id)
            .map(|row| row.item.clone())
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(notes)
    }

    async fn get_note(&self, owner: &str, note_id: &str) -> NotesResult<Note> {
        let tables = self.tables.read().await;
        owned_by(&tables.notes, owner, "Note", note_id).cloned()
    }

    async fn create_note(
        &self,
        owner: &str,
        title: &str,
        content: &str,
        chapter_id: Option<&str>,
    ) -> NotesResult<Note> {
        let mut tables = self.tables.write().await;
        if let Some(chapter_id) = chapter_id {
            owned_by(&tables.chapters, owner, "Chapter", chapter_id)?;
        }
        let now = Utc::now();
        let note = Note {
            id: new_id(),
            title: non_empty("title", title)?.to_string(),
            content: content.to_string(),
            chapter_id: chapter_id.map(String::from),
            created_at: now,
            updated_at: now,
        };
        tables.notes.insert(
            note.id.clone(),
            Owned {
                owner: owner.to_string(),
                item: note.clone(),
            },
        );
        Ok(note)
    }

    async fn update_note(
        &self,
        owner: &str,
        note_id: &str,
        update: NoteUpdate,
    ) -> NotesResult<Note> {
        if update.title.is_none() && update.content.is_none() {
            return Err(NotesError::Invalid(
                "at least one of title or content must be given".to_string(),
            ));
        }
        let title = update
            .title
            .as_deref()
            .map(|t| non_empty("title", t).map(String::from))
            .transpose()?;

        let mut tables = self.tables.write().await;
        owned_by(&tables.notes, owner, "Note", note_id)?;
        let row = tables
            .notes
            .get_mut(note_id)
            .ok_or_else(|| NotesError::Storage(format!("note {} vanished", note_id)))?;
        if let Some(title) = title {
            row.item.title = title;
        }
        if let Some(content) = update.content {
            row.item.content = content;
        }
        row.item.updated_at = Utc::now();
        Ok(row.item.clone())
    }

    async fn delete_note(&self, owner: &str, note_id: &str) -> NotesResult<()> {
        let mut tables = self.tables.write().await;
        owned_by(&tables.notes, owner, "Note", note_id)?;
        tables.notes.remove(note_id);
        Ok(())
    }

    async fn search_notes(&self, owner: &str, query: &str, limit: usize) -> NotesResult<Vec<Note>> {
        let needle = non_empty("query", query)?.to_lowercase();
        let mut notes = self.list_notes(owner, None).await?;
        notes.retain(|note| {
            note.title.to_lowercase().contains(&needle)
                || note.content.to_lowercase().contains(&needle)
        });
        notes.truncate(limit);
        Ok(notes)
    }

    async fn list_tasks(&self, owner: &str, include_completed: bool) -> NotesResult<Vec<Task>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|row| row.owner == owner && (include_completed || !row.item.completed))
            .map(|row| row.item.clone())
            .collect();
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks)
    }

    async fn create_task(&self, owner: &str, task: NewTask) -> NotesResult<Task> {
        let due_date = task
            .due_date
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                    NotesError::Invalid(format!("due_date '{}' is not a YYYY-MM-DD date", d))
                })
            })
            .transpose()?;

        let mut tables = self.tables.write().await;
        if let Some(note_id) = task.note_id.as_deref() {
            owned_by(&tables.notes, owner, "Note", note_id)?;
        }
        let task = Task {
            id: new_id(),
            title: non_empty("title", &task.title)?.to_string(),
            completed: false,
            due_date,
            note_id: task.note_id,
            created_at: Utc::now(),
        };
        tables.tasks.insert(
            task.id.clone(),
            Owned {
                owner: owner.to_string(),
                item: task.clone(),
            },
        );
        Ok(task)
    }

    async fn complete_task(&self, owner: &str, task_id: &str) -> NotesResult<Task> {
        let mut tables = self.tables.write().await;
        owned_by(&tables.tasks, owner, "Task", task_id)?;
        let row = tables
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| NotesError::Storage(format!("task {} vanished", task_id)))?;
        row.item.completed = true;
        Ok(row.item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notes_are_scoped_to_owner() -> NotesResult<()> {
        let store = MemoryNotesStore::new();
        let note = store.create_note("alice", "Groceries", "milk", None).await?;

        assert_eq!(store.get_note("alice", &note.id).await?.title, "Groceries");
        assert_eq!(
            store.get_note("bob", &note.id).await,
            Err(NotesError::NotFound {
                kind: "Note",
                id: note.id.clone()
            })
        );
        assert!(store.list_notes("bob", None).await?.is_empty());
        assert!(store.delete_note("bob", &note.id).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_chapters_and_filtered_notes() -> NotesResult<()> {
        let store = MemoryNotesStore::new();
        let notebook = store.create_notebook("alice", "Work", None).await?;
        let chapter = store.create_chapter("alice", &notebook.id, "Meetings").await?;
        store
            .create_note("alice", "Standup", "notes", Some(&chapter.id))
            .await?;
        store.create_note("alice", "Loose", "", None).await?;

        assert_eq!(store.list_chapters("alice", &notebook.id).await?.len(), 1);
        let filed = store.list_notes("alice", Some(&chapter.id)).await?;
        assert_eq!(filed.len(), 1);
        assert_eq!(filed[0].title, "Standup");
        assert_eq!(store.list_notes("alice", None).await?.len(), 2);
        assert!(store.create_chapter("bob", &notebook.id, "Nope").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_search() -> NotesResult<()> {
        let store = MemoryNotesStore::new();
        let note = store.create_note("alice", "Rust", "ownership", None).await?;
        store.create_note("alice", "Go", "goroutines", None).await?;

        let updated = store
            .update_note(
                "alice",
                &note.id,
                NoteUpdate {
                    title: None,
                    content: Some("Borrowing rules".to_string()),
                },
            )
            .await?;
        assert_eq!(updated.title, "Rust");
        assert!(updated.updated_at >= updated.created_at);

        let found = store.search_notes("alice", "BORROW", 10).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, note.id);

        assert!(matches!(
            store
                .update_note("alice", &note.id, NoteUpdate::default())
                .await,
            Err(NotesError::Invalid(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_tasks() -> NotesResult<()> {
        let store = MemoryNotesStore::new();
        let task = store
            .create_task(
                "alice",
                NewTask {
                    title: "Ship it".to_string(),
                    due_date: Some("2024-05-01".to_string()),
                    note_id: None,
                },
            )
            .await?;
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));

        store.complete_task("alice", &task.id).await?;
        assert!(store.list_tasks("alice", false).await?.is_empty());
        assert_eq!(store.list_tasks("alice", true).await?.len(), 1);

        let bad_date = store
            .create_task(
                "alice",
                NewTask {
                    title: "Later".to_string(),
                    due_date: Some("next week".to_string()),
                    note_id: None,
                },
            )
            .await;
        assert!(matches!(bad_date, Err(NotesError::Invalid(_))));
        Ok(())
    }
}
