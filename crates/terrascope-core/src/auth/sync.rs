//! Cross-context session sync.
//!
//! Every Terrascope process shares one session document; this task mirrors
//! a sign-out performed elsewhere into the local store. The watcher fires on
//! our own writes too - `SessionStore::sync_from_disk` is a no-op in that
//! case, so no feedback loop is possible.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::auth::session::SessionStore;
use crate::storage::StorageWatcher;

pub struct SessionSync {
    handle: JoinHandle<()>,
}

impl SessionSync {
    /// Spawn the reconciliation task over an existing watcher. The task runs
    /// until the watcher shuts down or the handle is dropped.
    pub fn spawn(store: Arc<SessionStore>, mut watcher: StorageWatcher) -> Self {
        let handle = tokio::spawn(async move {
            while watcher.changed().await.is_some() {
                if let Err(e) = store.sync_from_disk() {
                    warn!(err = %e, "failed to reconcile session storage change");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        // Session state dies with its context; there is nothing to flush.
        self.handle.abort();
    }
}
