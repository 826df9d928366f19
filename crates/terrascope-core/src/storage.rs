//! Durable session storage shared across application contexts.
//!
//! One JSON document (`session.json`) in the app data directory holds the
//! credential keys and the logged-out marker. Every Terrascope process on the
//! machine reads the same document, so a sign-out in one context is visible
//! to all of them. Only `auth::SessionStore` may write it; everything else
//! observes the store, or (for cross-context sync) the file mutation events
//! exposed by [`StorageWatcher`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::User;

/// Session file name in the storage directory
const SESSION_FILE: &str = "session.json";

/// On-disk session record. Field names match the storage keys used by the
/// service's web origin, keeping the document interoperable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(rename = "loggedOut", default)]
    pub logged_out: bool,
}

/// Handle to the session document on disk.
///
/// Cloning is cheap (paths only); clones address the same document, which is
/// how a watcher and the store can share one location.
#[derive(Debug, Clone)]
pub struct StorageFile {
    dir: PathBuf,
    path: PathBuf,
}

impl StorageFile {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        let path = dir.join(SESSION_FILE);
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the current record. A missing document means "never signed in";
    /// an unreadable one is treated the same way (fail closed) rather than
    /// surfacing a parse error to the session layer.
    pub fn load(&self) -> SessionRecord {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return SessionRecord::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!(err = %e, "session storage unreadable, treating as signed out");
                SessionRecord::default()
            }
        }
    }

    /// Persist a record atomically: write a temp file in the same directory,
    /// then rename over the document so concurrent readers never see a torn
    /// write.
    pub fn persist(&self, record: &SessionRecord) -> Result<()> {
        let contents = serde_json::to_string_pretty(record)?;
        let tmp = self.dir.join(format!("{}.{}.tmp", SESSION_FILE, std::process::id()));
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write session storage {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session storage")?;
        Ok(())
    }
}

/// Mutation events for the session document, fed by filesystem notification.
///
/// Delivers a unit signal whenever any process (including this one) creates,
/// rewrites, or removes the document. Consumers re-read the document and
/// decide what changed; the event itself carries no payload.
pub struct StorageWatcher {
    // Held for its side effect: dropping it stops the notification stream.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl StorageWatcher {
    pub fn new(storage: &StorageFile) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let file_name = storage
            .path()
            .file_name()
            .map(|n| n.to_owned())
            .context("session storage path has no file name")?;

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!(err = %e, "storage watcher error"),
            })
            .context("Failed to create storage watcher")?;

        // Watch the directory, not the file: the atomic rename in `persist`
        // would otherwise drop the watch with the replaced inode.
        watcher
            .watch(storage.dir(), RecursiveMode::NonRecursive)
            .context("Failed to watch storage directory")?;

        Ok(Self { _watcher: watcher, rx })
    }

    /// Wait for the next mutation event. Returns `None` when the watcher has
    /// shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
