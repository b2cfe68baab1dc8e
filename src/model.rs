use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Prefix for client-generated provisional IDs. Server-assigned IDs are
/// numeric, so the prefix keeps the two namespaces disjoint.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh provisional task ID, unique within (and across)
/// client sessions.
pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Whether an identifier is a provisional (client-generated) one.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(Error::Validation(format!(
                "unknown status '{other}' (expected pending, in_progress, or completed)"
            ))),
        }
    }
}

/// A task record as held in the Local Store.
///
/// `id` is either a provisional ID (`local-…`) or the server-assigned ID.
/// `local_id` survives the provisional→server transition so queued
/// operations that still reference the provisional ID can be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True once the server has acknowledged the current state.
    pub synced: bool,
    pub local_id: Option<String>,
}

impl Task {
    /// Build a provisional task from a creation payload, timestamped now.
    pub fn provisional(payload: &TaskPayload) -> Self {
        let id = new_local_id();
        let now = Utc::now();
        Self {
            id: id.clone(),
            title: payload.title.clone().unwrap_or_default(),
            description: payload.description.clone(),
            status: payload.status.unwrap_or(TaskStatus::Pending),
            due_date: payload.due_date,
            created_at: now,
            updated_at: now,
            synced: false,
            local_id: Some(id),
        }
    }

    /// Merge a field-level mutation into this task (last write wins).
    pub fn apply(&mut self, payload: &TaskPayload) {
        if let Some(title) = &payload.title {
            self.title = title.clone();
        }
        if let Some(description) = &payload.description {
            self.description = Some(description.clone());
        }
        if let Some(status) = payload.status {
            self.status = status;
        }
        if let Some(due_date) = payload.due_date {
            self.due_date = Some(due_date);
        }
        self.updated_at = Utc::now();
    }
}

/// Field-level mutation sent to the server and stored in queue payloads.
/// Absent fields are left untouched by an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskPayload {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Validate a payload used to create a task. Title is required and
    /// must be non-empty; surfaced immediately, never queued.
    pub fn validate_for_create(&self) -> Result<(), Error> {
        match self.title.as_deref().map(str::trim) {
            Some("") | None => Err(Error::Validation("title is required".into())),
            Some(_) => Ok(()),
        }
    }
}

/// Queue operation types, stored as their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    CreateTask,
    UpdateTask,
    DeleteTask,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::CreateTask => "CREATE_TASK",
            OpKind::UpdateTask => "UPDATE_TASK",
            OpKind::DeleteTask => "DELETE_TASK",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_TASK" => Ok(OpKind::CreateTask),
            "UPDATE_TASK" => Ok(OpKind::UpdateTask),
            "DELETE_TASK" => Ok(OpKind::DeleteTask),
            other => Err(Error::Database(format!("unknown queue op kind '{other}'"))),
        }
    }
}

/// A pending mutation awaiting replay against the server.
///
/// `id` is the AUTOINCREMENT sequence number: durable ordering and
/// identity in one. CREATE carries `local_id`; UPDATE/DELETE carry
/// `task_id` (which may itself still be provisional if the target was
/// created offline).
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOp {
    pub id: i64,
    pub kind: OpKind,
    pub local_id: Option<String>,
    pub task_id: Option<String>,
    pub payload: TaskPayload,
    pub queued_at: DateTime<Utc>,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ids_are_distinguishable_and_unique() {
        let a = new_local_id();
        let b = new_local_id();
        assert_ne!(a, b);
        assert!(is_local_id(&a));
        assert!(!is_local_id("42"));
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_provisional_task_defaults() {
        let task = Task::provisional(&TaskPayload::new("Buy milk"));
        assert!(is_local_id(&task.id));
        assert_eq!(task.local_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.synced);
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut task = Task::provisional(&TaskPayload::new("Buy milk"));
        task.description = Some("2%".into());
        task.apply(&TaskPayload {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        });
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.description.as_deref(), Some("2%"));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_validate_for_create_requires_title() {
        assert!(TaskPayload::default().validate_for_create().is_err());
        assert!(TaskPayload::new("  ").validate_for_create().is_err());
        assert!(TaskPayload::new("ok").validate_for_create().is_ok());
    }

    #[test]
    fn test_payload_serialization_skips_absent_fields() {
        let json = serde_json::to_value(TaskPayload::new("Buy milk")).unwrap();
        assert_eq!(json, serde_json::json!({"title": "Buy milk"}));
    }
}
