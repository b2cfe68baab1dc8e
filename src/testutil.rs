//! In-memory `Gateway` fake with scriptable failures, for exercising the
//! sync engine without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::model::{TaskPayload, TaskStatus};
use crate::remote::{Gateway, RemoteFile, RemoteTask};

/// A failure to inject into the next mutating call (create/update/delete).
pub(crate) enum FakeFailure {
    Network,
    Http(u16),
}

impl FakeFailure {
    fn into_error(self) -> Error {
        match self {
            FakeFailure::Network => Error::Network("connection refused".into()),
            FakeFailure::Http(status) => Error::Http {
                status,
                message: format!("scripted {status}"),
            },
        }
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<i64, RemoteTask>,
    next_id: i64,
    calls: Vec<String>,
    failures: VecDeque<FakeFailure>,
}

/// An always-consistent fake server. Mutating calls consume scripted
/// failures in FIFO order; reads never fail unless gated.
pub(crate) struct FakeGateway {
    inner: Mutex<Inner>,
    list_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
            list_gate: Mutex::new(None),
        }
    }

    /// Script a failure for the next mutating call.
    pub(crate) fn push_failure(&self, failure: FakeFailure) {
        self.inner.lock().unwrap().failures.push_back(failure);
    }

    /// Make the next `list_tasks` call park until the returned handle is
    /// notified. Used to hold a drain open mid-flight.
    pub(crate) fn gate_next_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Seed a task on the fake server, as if another client created it.
    pub(crate) fn seed_task(&self, title: &str) -> RemoteTask {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let now = Utc::now();
        let task = RemoteTask {
            id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Pending,
            due_date: None,
            files_count: Some(0),
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, task.clone());
        task
    }

    pub(crate) fn task(&self, id: i64) -> Option<RemoteTask> {
        self.inner.lock().unwrap().tasks.get(&id).cloned()
    }

    pub(crate) fn task_count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn take_failure(inner: &mut Inner) -> Option<Error> {
        inner.failures.pop_front().map(FakeFailure::into_error)
    }

    fn parse_id(id: &str) -> Result<i64> {
        id.parse::<i64>().map_err(|_| Error::Http {
            status: 404,
            message: format!("Couldn't find Task with 'id'={id}"),
        })
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>> {
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("list_tasks".into());
        Ok(inner.tasks.values().cloned().collect())
    }

    async fn get_task(&self, id: &str) -> Result<Option<RemoteTask>> {
        let numeric = Self::parse_id(id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("get_task {id}"));
        inner.tasks.get(&numeric).cloned().map(Some).ok_or(Error::Http {
            status: 404,
            message: format!("Couldn't find Task with 'id'={id}"),
        })
    }

    async fn create_task(&self, payload: &TaskPayload) -> Result<Option<RemoteTask>> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(format!("create_task {}", payload.title.as_deref().unwrap_or("")));
        if let Some(err) = Self::take_failure(&mut inner) {
            return Err(err);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let now = Utc::now();
        let task = RemoteTask {
            id,
            title: payload.title.clone().unwrap_or_default(),
            description: payload.description.clone(),
            status: payload.status.unwrap_or(TaskStatus::Pending),
            due_date: payload.due_date,
            files_count: Some(0),
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, task.clone());
        Ok(Some(task))
    }

    async fn update_task(&self, id: &str, payload: &TaskPayload) -> Result<Option<RemoteTask>> {
        let numeric = Self::parse_id(id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("update_task {id}"));
        if let Some(err) = Self::take_failure(&mut inner) {
            return Err(err);
        }
        let task = inner.tasks.get_mut(&numeric).ok_or(Error::Http {
            status: 404,
            message: format!("Couldn't find Task with 'id'={id}"),
        })?;
        if let Some(title) = &payload.title {
            task.title = title.clone();
        }
        if let Some(description) = &payload.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = payload.status {
            task.status = status;
        }
        if let Some(due_date) = payload.due_date {
            task.due_date = Some(due_date);
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let numeric = Self::parse_id(id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("delete_task {id}"));
        if let Some(err) = Self::take_failure(&mut inner) {
            return Err(err);
        }
        if inner.tasks.remove(&numeric).is_none() {
            return Err(Error::Http {
                status: 404,
                message: format!("Couldn't find Task with 'id'={id}"),
            });
        }
        Ok(())
    }

    async fn upload_file(&self, task_id: &str, _filename: &str, _bytes: Vec<u8>) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("upload_file {task_id}"));
        if let Some(err) = Self::take_failure(&mut inner) {
            return Err(err);
        }
        Ok(1)
    }

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("list_files {task_id}"));
        Ok(Vec::new())
    }

    async fn delete_file(&self, task_id: &str, file_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("delete_file {task_id}/{file_id}"));
        if let Some(err) = Self::take_failure(&mut inner) {
            return Err(err);
        }
        Ok(())
    }
}
