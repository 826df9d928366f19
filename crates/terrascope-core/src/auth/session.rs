//! The credential store: single source of truth for session state.
//!
//! `SessionStore` owns the in-memory session snapshot and is the only
//! component allowed to write the durable storage document. Interceptors,
//! the expiry scheduler, and the route guard read snapshots and request
//! mutations through the methods here; none of them touch storage directly.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::auth::token;
use crate::models::User;
use crate::storage::{SessionRecord, StorageFile};

/// Capacity of the lifecycle event channel. Events are small and consumers
/// are prompt; lagging receivers skip ahead rather than block the store.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit logout requested in this context.
    UserRequested,
    /// The access credential reached (or passed) its expiry.
    Expired,
    /// The server rejected the credentials and refresh could not recover.
    Rejected,
    /// Another context signed out and this one mirrored it.
    ExternalContext,
}

impl std::fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignOutReason::UserRequested => write!(f, "signed out"),
            SignOutReason::Expired => write!(f, "session expired"),
            SignOutReason::Rejected => write!(f, "session rejected by server"),
            SignOutReason::ExternalContext => write!(f, "signed out in another window"),
        }
    }
}

/// Session lifecycle events, broadcast to interested components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut { reason: SignOutReason },
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub is_authenticated: bool,
}

/// Display-oriented session summary ("session expires in ...").
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub is_authenticated: bool,
    pub current_user: Option<User>,
    pub access_expiry: Option<DateTime<Utc>>,
    pub refresh_expiry: Option<DateTime<Utc>>,
}

pub struct SessionStore {
    /// Guards disk writes so store mutations serialize; held across the
    /// persist and the snapshot publish.
    storage: Mutex<StorageFile>,
    state: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Open the store over the given storage document, restoring whatever
    /// session it holds. Expiry is not checked here - the bootstrap check
    /// (`auth::check_persisted`) decides whether a restored session is live.
    pub fn open(storage: StorageFile) -> Self {
        let record = storage.load();
        let (state, _) = watch::channel(Self::snapshot_from(&record));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { storage: Mutex::new(storage), state, events }
    }

    fn snapshot_from(record: &SessionRecord) -> SessionSnapshot {
        let is_authenticated = !record.logged_out
            && record.access_token.is_some()
            && record.refresh_token.is_some();
        SessionSnapshot {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            user: record.user.clone(),
            is_authenticated,
        }
    }

    /// Establish a new session. Clears any logged-out marker left by a
    /// previous sign-out.
    pub fn set_credentials(&self, access: String, refresh: String, user: User) -> Result<()> {
        self.write(SessionRecord {
            access_token: Some(access),
            refresh_token: Some(refresh),
            user: Some(user),
            logged_out: false,
        })?;
        let _ = self.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    /// Replace only the access credential (the silent-refresh path).
    pub fn set_access_token(&self, access: String) -> Result<()> {
        let snapshot = self.snapshot();
        self.write(SessionRecord {
            access_token: Some(access),
            refresh_token: snapshot.refresh_token,
            user: snapshot.user,
            logged_out: false,
        })?;
        let _ = self.events.send(SessionEvent::Refreshed);
        Ok(())
    }

    /// Replace the current-user profile without touching credentials.
    pub fn set_user(&self, user: User) -> Result<()> {
        let snapshot = self.snapshot();
        self.write(SessionRecord {
            access_token: snapshot.access_token,
            refresh_token: snapshot.refresh_token,
            user: Some(user),
            logged_out: !snapshot.is_authenticated,
        })
    }

    /// End the session: drop credentials and user, persist the logged-out
    /// marker so sibling contexts observe the sign-out.
    ///
    /// Idempotent: clearing an already-cleared store re-asserts the marker
    /// but emits no second event.
    pub fn clear(&self, reason: SignOutReason) -> Result<()> {
        let was_authenticated = self.state.borrow().is_authenticated;
        self.write(SessionRecord { logged_out: true, ..SessionRecord::default() })?;
        if was_authenticated {
            debug!(%reason, "session cleared");
            let _ = self.events.send(SessionEvent::SignedOut { reason });
        }
        Ok(())
    }

    fn write(&self, record: SessionRecord) -> Result<()> {
        let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        storage.persist(&record)?;
        self.state.send_replace(Self::snapshot_from(&record));
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch channel tracking every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Broadcast channel of lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session_info(&self) -> SessionInfo {
        let snapshot = self.snapshot();
        SessionInfo {
            is_authenticated: snapshot.is_authenticated,
            access_expiry: snapshot.access_token.as_deref().and_then(token::decode_expiry),
            refresh_expiry: snapshot.refresh_token.as_deref().and_then(token::decode_expiry),
            current_user: snapshot.user,
        }
    }

    /// Reconcile with the storage document after another context mutated it.
    ///
    /// Only an external sign-out is mirrored: the logged-out marker being
    /// set, or the credential keys being gone, while this context still
    /// considers itself authenticated. Credentials added by another context
    /// are deliberately ignored - sign-in does not propagate. Nothing is
    /// written back, so mirroring cannot ping-pong between contexts.
    pub fn sync_from_disk(&self) -> Result<()> {
        let record = {
            let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.load()
        };
        let externally_cleared = record.logged_out
            || record.access_token.is_none()
            || record.refresh_token.is_none();
        if externally_cleared && self.state.borrow().is_authenticated {
            self.state.send_replace(Self::snapshot_from(&record));
            let _ = self
                .events
                .send(SessionEvent::SignedOut { reason: SignOutReason::ExternalContext });
        }
        Ok(())
    }
}
