use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::model::{is_local_id, OpKind, QueuedOp};
use crate::remote::Gateway;
use crate::storage::{repository, Database};
use crate::sync::{DrainReport, SyncState};

/// Periodic sync cadence.
const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Outcome of replaying a single queued operation.
enum Replay {
    /// Acknowledged by the server and reconciled; remove from the queue.
    Applied,
    /// Cannot be attempted yet (target has no server ID); bump the retry
    /// count and leave it queued.
    Deferred(String),
    /// Terminally rejected (4xx); a replay can never succeed, remove it.
    Dropped(String),
}

/// Orchestrates the offline-first sync loop: on connectivity regain or
/// periodic tick, drains the Mutation Queue against the Remote Gateway in
/// enqueue order, reconciles responses into the Local Store, then merges
/// the authoritative server task list.
pub struct SyncCoordinator {
    db: Database,
    gateway: Arc<dyn Gateway>,
    connectivity: Connectivity,
    state: Arc<watch::Sender<SyncState>>,
    /// Guard against overlapping drains: a trigger that arrives while a
    /// drain is running is skipped, not queued.
    draining: Arc<AtomicBool>,
    tick: Duration,
}

impl SyncCoordinator {
    pub fn new(db: Database, gateway: Arc<dyn Gateway>, connectivity: Connectivity) -> Self {
        let initial = if connectivity.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial);
        Self {
            db,
            gateway,
            connectivity,
            state: Arc::new(state),
            draining: Arc::new(AtomicBool::new(false)),
            tick: DEFAULT_TICK,
        }
    }

    /// Override the periodic tick (tests use a short one).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Observe state transitions (e.g. for a status indicator).
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// Run the coordinator loop: an immediate pass, then one per periodic
    /// tick, plus one whenever connectivity is regained. Pass failures are
    /// logged and retried on the next trigger, never fatal to the loop.
    pub async fn run(&self) {
        let mut transitions = self.connectivity.subscribe();
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sync_once().await {
                        log::error!("Sync pass failed: {e}");
                    }
                }
                changed = transitions.changed() => {
                    if changed.is_err() {
                        // Connectivity signal owner went away; stop.
                        break;
                    }
                    let online = *transitions.borrow_and_update();
                    if online {
                        log::info!("Connectivity regained, syncing");
                        if let Err(e) = self.sync_once().await {
                            log::error!("Sync pass failed: {e}");
                        }
                    } else {
                        log::info!("Connectivity lost, pausing sync");
                        self.set_state(SyncState::Offline);
                    }
                }
            }
        }
    }

    /// One guarded sync pass: drain the queue, then merge the server list.
    /// Returns `Ok(None)` when skipped (offline, or a drain is already in
    /// flight).
    pub async fn sync_once(&self) -> Result<Option<DrainReport>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Drain already in progress, skipping trigger");
            return Ok(None);
        }
        let result = self.sync_pass().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn sync_pass(&self) -> Result<Option<DrainReport>> {
        if !self.connectivity.is_online() {
            self.set_state(SyncState::Offline);
            log::debug!("Offline, changes will sync when online");
            return Ok(None);
        }

        self.set_state(SyncState::Syncing);
        let outcome = self.drain_and_merge().await;
        self.set_state(if self.connectivity.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        });
        outcome.map(Some)
    }

    async fn drain_and_merge(&self) -> Result<DrainReport> {
        let mut report = self.drain().await?;

        // The merge is additive only: a momentarily incomplete server list
        // must never delete local tasks.
        match self.merge_remote().await {
            Ok(merged) => report.merged = merged,
            Err(e) => log::warn!("Failed to merge server task list: {e}"),
        }

        if report.attempted > 0 {
            log::info!(
                "Drain finished: {} replayed, {} failed, {} dropped of {}",
                report.replayed,
                report.failed,
                report.dropped,
                report.attempted
            );
        }
        Ok(report)
    }

    /// One full pass over the Mutation Queue in enqueue order. A failed
    /// operation is left queued with its retry count bumped and processing
    /// continues, so partial progress is preserved. Only Local Store /
    /// queue failures abort the pass.
    async fn drain(&self) -> Result<DrainReport> {
        let ops = self
            .db
            .reader()
            .call(|conn| repository::list_pending_ops(conn))
            .await?;

        let mut report = DrainReport {
            attempted: ops.len(),
            ..Default::default()
        };
        // Server IDs assigned by CREATEs replayed in this pass, so later
        // operations against the same provisional ID can resolve even
        // before the store reflects the swap.
        let mut created: HashMap<String, String> = HashMap::new();

        for op in ops {
            let op_id = op.id;
            match self.replay(&op, &mut created).await {
                Ok(Replay::Applied) => {
                    self.remove_op(op_id).await?;
                    report.replayed += 1;
                }
                Ok(Replay::Deferred(reason)) => {
                    log::debug!("Deferring {} #{op_id}: {reason}", op.kind);
                    self.increment_retry(op_id).await?;
                    report.failed += 1;
                }
                Ok(Replay::Dropped(reason)) => {
                    log::warn!("Dropping {} #{op_id}, replay can never succeed: {reason}", op.kind);
                    self.remove_op(op_id).await?;
                    report.dropped += 1;
                }
                Err(e @ (Error::Database(_) | Error::Migration(_))) => return Err(e),
                Err(e) => {
                    log::warn!("Replay of {} #{op_id} failed (retry {}): {e}", op.kind, op.retries + 1);
                    self.increment_retry(op_id).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn replay(&self, op: &QueuedOp, created: &mut HashMap<String, String>) -> Result<Replay> {
        match op.kind {
            OpKind::CreateTask => self.replay_create(op, created).await,
            OpKind::UpdateTask => self.replay_update(op, created).await,
            OpKind::DeleteTask => self.replay_delete(op, created).await,
        }
    }

    async fn replay_create(
        &self,
        op: &QueuedOp,
        created: &mut HashMap<String, String>,
    ) -> Result<Replay> {
        let Some(local_id) = op.local_id.clone() else {
            return Ok(Replay::Dropped("CREATE carries no local_id".into()));
        };

        match self.gateway.create_task(&op.payload).await {
            Ok(Some(remote)) => {
                created.insert(local_id.clone(), remote.id.to_string());
                self.db
                    .writer()
                    .call({
                        let local_id = local_id.clone();
                        move |conn| {
                            if repository::get_task(conn, &local_id)?.is_some() {
                                let task = remote.into_task(Some(local_id.clone()));
                                repository::replace_provisional(conn, &local_id, &task)?;
                            } else {
                                // Deleted locally before the replay; the
                                // server record will arrive via the merge.
                                log::debug!("Provisional {local_id} gone from store, skipping reconcile");
                            }
                            Ok::<(), rusqlite::Error>(())
                        }
                    })
                    .await?;
                Ok(Replay::Applied)
            }
            Ok(None) => {
                // Acknowledged without a body: no server ID to adopt.
                log::warn!("CREATE acknowledged with no content, keeping provisional ID {local_id}");
                self.mark_synced(&local_id).await?;
                Ok(Replay::Applied)
            }
            Err(Error::Http { status, message }) if status < 500 => {
                Ok(Replay::Dropped(format!("HTTP {status}: {message}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn replay_update(
        &self,
        op: &QueuedOp,
        created: &HashMap<String, String>,
    ) -> Result<Replay> {
        let Some(target) = op.task_id.clone() else {
            return Ok(Replay::Dropped("UPDATE carries no task_id".into()));
        };
        let server_id = match self.resolve_target(&target, created).await? {
            Some(id) => id,
            None => {
                return Ok(Replay::Deferred(format!(
                    "target {target} has no server ID yet"
                )))
            }
        };

        match self.gateway.update_task(&server_id, &op.payload).await {
            Ok(Some(remote)) => {
                self.db
                    .writer()
                    .call(move |conn| {
                        let id = remote.id.to_string();
                        let local_id =
                            repository::get_task(conn, &id)?.and_then(|t| t.local_id);
                        repository::save_task(conn, &remote.into_task(local_id))
                    })
                    .await?;
                Ok(Replay::Applied)
            }
            Ok(None) => {
                self.mark_synced(&server_id).await?;
                Ok(Replay::Applied)
            }
            Err(Error::Http { status, message }) if status < 500 => {
                Ok(Replay::Dropped(format!("HTTP {status}: {message}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn replay_delete(
        &self,
        op: &QueuedOp,
        created: &HashMap<String, String>,
    ) -> Result<Replay> {
        let Some(target) = op.task_id.clone() else {
            return Ok(Replay::Dropped("DELETE carries no task_id".into()));
        };
        let server_id = match self.resolve_target(&target, created).await? {
            Some(id) => id,
            // The record was removed locally before its CREATE ever
            // reached the server; there is nothing remote to delete.
            None => return Ok(Replay::Dropped(format!("target {target} never reached the server"))),
        };

        match self.gateway.delete_task(&server_id).await {
            // The record was already removed optimistically; nothing
            // further to reconcile locally.
            Ok(()) => Ok(Replay::Applied),
            // Already gone server-side.
            Err(Error::Http { status: 404, .. }) => Ok(Replay::Applied),
            Err(Error::Http { status, message }) if status < 500 => {
                Ok(Replay::Dropped(format!("HTTP {status}: {message}")))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve an operation target to a server ID. Provisional targets go
    /// through the store's `local_id` index (the CREATE's reconciliation
    /// retains it) or the IDs assigned earlier in this drain.
    async fn resolve_target(
        &self,
        target: &str,
        created: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        if !is_local_id(target) {
            return Ok(Some(target.to_string()));
        }
        let stored = self
            .db
            .reader()
            .call({
                let target = target.to_string();
                move |conn| repository::get_task_by_local_id(conn, &target)
            })
            .await?
            .map(|task| task.id)
            .filter(|id| !is_local_id(id));
        Ok(stored.or_else(|| created.get(target).cloned()))
    }

    async fn mark_synced(&self, id: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let id = id.to_string();
                move |conn| {
                    if let Some(mut task) = repository::get_task(conn, &id)? {
                        task.synced = true;
                        repository::save_task(conn, &task)?;
                    }
                    Ok::<(), rusqlite::Error>(())
                }
            })
            .await?;
        Ok(())
    }

    async fn remove_op(&self, op_id: i64) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::remove_op(conn, op_id))
            .await?;
        Ok(())
    }

    async fn increment_retry(&self, op_id: i64) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::increment_retry(conn, op_id))
            .await?;
        Ok(())
    }

    /// Fetch the authoritative task list and save each task with
    /// `synced=true`. Additive/overwriting only: local tasks absent from
    /// the response are kept, and rows with unacknowledged local edits
    /// (`synced=false`) are left for their queued operations to reconcile.
    pub(crate) async fn merge_remote(&self) -> Result<usize> {
        let remote_tasks = self.gateway.list_tasks().await?;
        let merged = self
            .db
            .writer()
            .call(move |conn| {
                let mut merged = 0usize;
                for remote in remote_tasks {
                    let id = remote.id.to_string();
                    let existing = repository::get_task(conn, &id)?;
                    if existing.as_ref().is_some_and(|t| !t.synced) {
                        continue;
                    }
                    let local_id = existing.and_then(|t| t.local_id);
                    repository::save_task(conn, &remote.into_task(local_id))?;
                    merged += 1;
                }
                Ok::<usize, rusqlite::Error>(merged)
            })
            .await?;
        Ok(merged)
    }
}
