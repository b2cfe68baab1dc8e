use std::sync::Arc;

use tokio::sync::watch;

/// The platform's online/offline signal: a current boolean plus transition
/// events the Sync Coordinator subscribes to. The embedding application
/// (CLI flag, OS hook, test harness) owns flipping it; the sync engine only
/// observes.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Flip the signal. Subscribers only wake on actual transitions.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    /// Subscribe to transitions. The receiver observes the latest value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
