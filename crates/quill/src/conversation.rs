use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::message::Message;

/// The last completed conversation of each user, kept for debugging
#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: RwLock<HashMap<String, Vec<Message>>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, user_id: &str, messages: Vec<Message>) {
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), messages);
    }

    pub async fn last(&self, user_id: &str) -> Option<Vec<Message>> {
        self.entries.read().await.get(user_id).cloned()
    }
}
