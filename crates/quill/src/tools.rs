//! Tools the model can call, and the executor that runs them against the
//! notes store.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod notes;

pub use catalog::CATALOG;
pub use error::{ToolError, ToolResult};
pub use executor::{CatalogToolExecutor, ToolExecutor};
pub use notes::{MemoryNotesStore, NotesError, NotesStore};
