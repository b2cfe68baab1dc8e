pub mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{Task, TaskPayload, TaskStatus};

/// A task as the server renders it. Server IDs are numeric; they become
/// strings at the Local Store boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteTask {
    /// Convert into a Local Store record. Server data is authoritative,
    /// so the result is acknowledged (`synced=true`); `local_id` carries
    /// the provisional identifier across the ID transition when there
    /// was one.
    pub fn into_task(self, local_id: Option<String>) -> Task {
        Task {
            id: self.id.to_string(),
            title: self.title,
            description: self.description,
            status: self.status,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced: true,
            local_id,
        }
    }
}

/// A file attachment as listed by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub byte_size: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Thin request/response abstraction over the task REST API.
///
/// Every call either resolves with a parsed body or fails with
/// `Error::Network` (no connectivity or timeout), `Error::Http` (4xx/5xx),
/// or `Error::Parse` (malformed response). A 204 No Content is a successful
/// null result: `Ok(None)` for the task calls, `Ok(())` for the deletes.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>>;

    async fn get_task(&self, id: &str) -> Result<Option<RemoteTask>>;

    async fn create_task(&self, payload: &TaskPayload) -> Result<Option<RemoteTask>>;

    async fn update_task(&self, id: &str, payload: &TaskPayload) -> Result<Option<RemoteTask>>;

    async fn delete_task(&self, id: &str) -> Result<()>;

    /// Upload a file attachment. Returns the server-assigned file ID.
    async fn upload_file(&self, task_id: &str, filename: &str, bytes: Vec<u8>) -> Result<i64>;

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>>;

    async fn delete_file(&self, task_id: &str, file_id: i64) -> Result<()>;
}
