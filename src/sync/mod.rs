pub mod coordinator;

pub use coordinator::SyncCoordinator;

use serde::Serialize;

/// Coordinator states. `Syncing` is entered once per drain; overlapping
/// triggers are skipped while it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Syncing,
    Offline,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Summary of one full pass over the Mutation Queue.
///
/// `replayed` operations were acknowledged and removed; `failed` ones hit a
/// retryable error and stay queued with a bumped retry count; `dropped`
/// ones were rejected terminally (4xx) and removed since a replay can never
/// succeed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub replayed: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Tasks merged from the authoritative server list after the drain.
    pub merged: usize,
}

impl DrainReport {
    pub fn status(&self) -> SyncStatus {
        if self.failed == 0 && self.dropped == 0 {
            SyncStatus::Success
        } else if self.replayed > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        }
    }
}
