//! Thread and message persistence.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::ParleyError;
use crate::types::{Message, Role, Thread};

/// Default title of a thread created on first message.
pub const DEFAULT_THREAD_TITLE: &str = "New conversation";

/// Storage for conversation threads and their messages.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Look up a thread; `None` when it does not exist.
    async fn find_thread(&self, id: &str) -> Result<Option<Thread>, ParleyError>;

    async fn create_thread(&self, title: &str) -> Result<Thread, ParleyError>;

    /// Append a message. Fails with `NotFound` when the thread is missing.
    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Message, ParleyError>;

    /// Messages of a thread in ascending `created_at` order.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ParleyError>;
}

pub(crate) fn new_thread(title: &str) -> Thread {
    Thread {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        created_at: Utc::now(),
    }
}

/// Build the next message of a thread with a timestamp strictly after `last`.
pub(crate) fn next_message(
    thread_id: &str,
    last: Option<DateTime<Utc>>,
    role: Role,
    content: &str,
    meta: Option<serde_json::Value>,
) -> Message {
    let now = Utc::now();
    let created_at = match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    };
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        role,
        content: content.to_string(),
        created_at,
        meta,
    }
}
