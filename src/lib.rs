pub mod connectivity;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use connectivity::Connectivity;
pub use error::{Error, Result};
pub use model::{OpKind, QueuedOp, Task, TaskPayload, TaskStatus};
pub use remote::{Gateway, HttpGateway, RemoteFile, RemoteTask};
pub use storage::Database;
pub use sync::{DrainReport, SyncCoordinator, SyncState, SyncStatus};

use std::sync::Arc;

use model::is_local_id;
use storage::repository;

/// Main entry point: owns the Local Store, the Remote Gateway, and the
/// Sync Coordinator.
///
/// Every user action follows the same local-first protocol: the Local
/// Store is updated optimistically, the server is tried immediately when
/// connectivity is present, and on a retryable failure the mutation is
/// appended to the durable queue for the coordinator to replay.
pub struct TaskClient {
    db: Database,
    gateway: Arc<dyn Gateway>,
    connectivity: Connectivity,
    coordinator: Arc<SyncCoordinator>,
}

impl TaskClient {
    pub fn new(db: Database, gateway: Arc<dyn Gateway>, connectivity: Connectivity) -> Self {
        let coordinator = Arc::new(SyncCoordinator::new(
            db.clone(),
            gateway.clone(),
            connectivity.clone(),
        ));
        Self {
            db,
            gateway,
            connectivity,
            coordinator,
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// The coordinator, for running the background loop or watching state.
    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        self.coordinator.clone()
    }

    /// Trigger one sync pass (drain + merge). Skipped if offline or if a
    /// pass is already running.
    pub async fn sync(&self) -> Result<Option<DrainReport>> {
        self.coordinator.sync_once().await
    }

    // ── Optimistic-write entry points ──────────────────────────────

    /// Create a task. Returns the provisional record when the server could
    /// not be reached (it syncs later), or the server-acknowledged record
    /// on an immediate success.
    pub async fn create_task(&self, payload: TaskPayload) -> Result<Task> {
        payload.validate_for_create()?;

        let provisional = Task::provisional(&payload);
        let local_id = provisional.id.clone();
        self.save(provisional.clone()).await?;

        if !self.connectivity.is_online() {
            self.enqueue(OpKind::CreateTask, Some(local_id), None, payload)
                .await?;
            return Ok(provisional);
        }

        match self.gateway.create_task(&payload).await {
            Ok(Some(remote)) => {
                let task = remote.into_task(Some(local_id.clone()));
                self.db
                    .writer()
                    .call({
                        let task = task.clone();
                        move |conn| repository::replace_provisional(conn, &local_id, &task)
                    })
                    .await?;
                Ok(task)
            }
            Ok(None) => {
                // Acknowledged without a body; keep the provisional ID.
                log::warn!("CREATE acknowledged with no content, keeping provisional ID {local_id}");
                let mut task = provisional;
                task.synced = true;
                self.save(task.clone()).await?;
                Ok(task)
            }
            Err(e) if e.is_retryable() => {
                log::info!("Create failed ({e}), queued for later sync");
                self.enqueue(OpKind::CreateTask, Some(local_id), None, payload)
                    .await?;
                Ok(provisional)
            }
            Err(e) => {
                // Terminal rejection (e.g. 422): this record can never
                // reach the server, so the optimistic write is rolled back
                // and the error surfaces to the user.
                self.db
                    .writer()
                    .call(move |conn| repository::delete_task(conn, &local_id))
                    .await?;
                Err(e)
            }
        }
    }

    /// Merge new fields into an existing task. The local write always
    /// lands first; the server sees it immediately or via the queue.
    pub async fn update_task(&self, id: &str, payload: TaskPayload) -> Result<Task> {
        let mut task = self
            .get_local(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        task.apply(&payload);
        task.synced = false;
        self.save(task.clone()).await?;

        // A still-provisional target is unknown to the server; the queued
        // UPDATE resolves to the server ID once its CREATE replays.
        if is_local_id(id) || !self.connectivity.is_online() {
            self.enqueue(OpKind::UpdateTask, None, Some(id.to_string()), payload)
                .await?;
            return Ok(task);
        }

        match self.gateway.update_task(id, &payload).await {
            Ok(Some(remote)) => {
                let reconciled = remote.into_task(task.local_id.clone());
                self.save(reconciled.clone()).await?;
                Ok(reconciled)
            }
            Ok(None) => {
                task.synced = true;
                self.save(task.clone()).await?;
                Ok(task)
            }
            Err(e) if e.is_retryable() => {
                log::info!("Update of {id} failed ({e}), queued for later sync");
                self.enqueue(OpKind::UpdateTask, None, Some(id.to_string()), payload)
                    .await?;
                Ok(task)
            }
            // Terminal: the optimistic local state stays (last write wins)
            // but nothing is queued, a replay could never succeed.
            Err(e) => Err(e),
        }
    }

    /// Delete a task. The local record is removed immediately and
    /// irrevocably, even if the remote call later fails.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .writer()
            .call({
                let id = id.clone();
                move |conn| repository::delete_task(conn, &id)
            })
            .await?;

        if is_local_id(&id) || !self.connectivity.is_online() {
            self.enqueue(OpKind::DeleteTask, None, Some(id), TaskPayload::default())
                .await?;
            return Ok(());
        }

        match self.gateway.delete_task(&id).await {
            Ok(()) => Ok(()),
            // Already gone server-side.
            Err(Error::Http { status: 404, .. }) => Ok(()),
            Err(e) if e.is_retryable() => {
                log::info!("Delete of {id} failed ({e}), queued for later sync");
                self.enqueue(OpKind::DeleteTask, None, Some(id), TaskPayload::default())
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Merge the authoritative server list (when online), then read the
    /// Local Store. Always answers from local data, even when the server
    /// is unreachable.
    pub async fn load_tasks(&self) -> Result<Vec<Task>> {
        if self.connectivity.is_online() {
            if let Err(e) = self.coordinator.merge_remote().await {
                log::warn!("Failed to fetch from server, using local data: {e}");
            }
        }
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_tasks(conn))
            .await?)
    }

    /// Offline-first single read: the Local Store first, the server as a
    /// fallback when online.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        if let Some(task) = self.get_local(id).await? {
            return Ok(Some(task));
        }
        if !self.connectivity.is_online() || is_local_id(id) {
            return Ok(None);
        }
        match self.gateway.get_task(id).await {
            Ok(Some(remote)) => {
                let task = remote.into_task(None);
                self.save(task.clone()).await?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(Error::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of queued mutations not yet confirmed by the server.
    pub async fn pending_sync_count(&self) -> Result<i64> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::pending_count(conn))
            .await?)
    }

    // ── File attachments (online only; uploads are not queued) ─────

    pub async fn attach_file(&self, task_id: &str, filename: &str, bytes: Vec<u8>) -> Result<i64> {
        if !self.connectivity.is_online() {
            return Err(Error::Network(
                "offline: file uploads are not queued for later sync".into(),
            ));
        }
        self.gateway.upload_file(task_id, filename, bytes).await
    }

    pub async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>> {
        self.gateway.list_files(task_id).await
    }

    pub async fn delete_file(&self, task_id: &str, file_id: i64) -> Result<()> {
        self.gateway.delete_file(task_id, file_id).await
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?)
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?)
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn get_local(&self, id: &str) -> Result<Option<Task>> {
        let id = id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_task(conn, &id))
            .await?)
    }

    async fn save(&self, task: Task) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::save_task(conn, &task))
            .await?;
        Ok(())
    }

    async fn enqueue(
        &self,
        kind: OpKind,
        local_id: Option<String>,
        task_id: Option<String>,
        payload: TaskPayload,
    ) -> Result<i64> {
        let op_id = self
            .db
            .writer()
            .call(move |conn| {
                repository::enqueue_op(conn, kind, local_id.as_deref(), task_id.as_deref(), &payload)
            })
            .await?;
        log::debug!("Enqueued {kind} #{op_id}");
        Ok(op_id)
    }
}
