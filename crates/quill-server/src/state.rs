use quill::conversation::ConversationLog;
use quill::orchestrator::ChatOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub conversations: Arc<ConversationLog>,
    /// Where conversation dumps are written, `None` when the debug route is off
    pub debug_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            conversations: Arc::new(ConversationLog::new()),
            debug_dir: None,
        }
    }

    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }
}
