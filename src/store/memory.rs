use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{new_thread, next_message, ThreadStore};
use crate::error::ParleyError;
use crate::types::{Message, Role, Thread};

struct MemoryEntry {
    thread: Thread,
    messages: Vec<Message>,
}

/// In-memory storage for testing and local development.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored threads.
    pub async fn thread_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn find_thread(&self, id: &str) -> Result<Option<Thread>, ParleyError> {
        Ok(self.entries.read().await.get(id).map(|e| e.thread.clone()))
    }

    async fn create_thread(&self, title: &str) -> Result<Thread, ParleyError> {
        let thread = new_thread(title);
        self.entries.write().await.insert(
            thread.id.clone(),
            MemoryEntry {
                thread: thread.clone(),
                messages: Vec::new(),
            },
        );
        Ok(thread)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Message, ParleyError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(thread_id)
            .ok_or_else(|| ParleyError::NotFound(format!("thread {thread_id}")))?;
        let last = entry.messages.last().map(|m| m.created_at);
        let message = next_message(thread_id, last, role, content, meta);
        entry.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ParleyError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(thread_id)
            .ok_or_else(|| ParleyError::NotFound(format!("thread {thread_id}")))?;
        Ok(entry.messages.clone())
    }
}
