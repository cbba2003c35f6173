//! One JSON document per thread under a base directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{new_thread, next_message, ThreadStore};
use crate::error::ParleyError;
use crate::types::{Message, Role, Thread};

#[derive(Debug, Serialize, Deserialize)]
struct ThreadDocument {
    thread: Thread,
    #[serde(default)]
    messages: Vec<Message>,
}

pub struct FileStore {
    base_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf, ParleyError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(format!("{thread_id}.json")))
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadDocument>, ParleyError> {
        let path = self.thread_path(thread_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(e)),
        };
        let document = serde_json::from_str(&content).map_err(persistence)?;
        Ok(Some(document))
    }

    async fn save(&self, document: &ThreadDocument) -> Result<(), ParleyError> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(persistence)?;
        let path = self.thread_path(&document.thread.id)?;
        let content = serde_json::to_string_pretty(document).map_err(persistence)?;
        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            document.thread.id,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persistence(e));
        }
        Ok(())
    }
}

fn persistence(err: impl std::fmt::Display) -> ParleyError {
    ParleyError::Persistence(err.to_string())
}

/// Thread ids are used as file names; reject anything path-like.
fn validate_thread_id(thread_id: &str) -> Result<(), ParleyError> {
    if thread_id.is_empty()
        || thread_id.contains(['/', '\\', '\0'])
        || thread_id.contains("..")
        || thread_id.chars().any(|c| c.is_control())
    {
        return Err(ParleyError::Validation(format!(
            "invalid thread id: {thread_id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl ThreadStore for FileStore {
    async fn find_thread(&self, id: &str) -> Result<Option<Thread>, ParleyError> {
        if validate_thread_id(id).is_err() {
            return Ok(None);
        }
        Ok(self.load(id).await?.map(|d| d.thread))
    }

    async fn create_thread(&self, title: &str) -> Result<Thread, ParleyError> {
        let _guard = self.write_lock.lock().await;
        let document = ThreadDocument {
            thread: new_thread(title),
            messages: Vec::new(),
        };
        self.save(&document).await?;
        tracing::debug!(thread_id = %document.thread.id, path = %self.base_path.display(), "thread created");
        Ok(document.thread)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Message, ParleyError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self
            .load(thread_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound(format!("thread {thread_id}")))?;
        let last = document.messages.last().map(|m| m.created_at);
        let message = next_message(thread_id, last, role, content, meta);
        document.messages.push(message.clone());
        self.save(&document).await?;
        Ok(message)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ParleyError> {
        let document = self
            .load(thread_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound(format!("thread {thread_id}")))?;
        Ok(document.messages)
    }
}
