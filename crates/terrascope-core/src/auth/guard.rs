//! Route guard: gates protected views on session state.

use std::sync::Arc;

use tracing::warn;

use crate::auth::session::{SessionSnapshot, SessionStore, SignOutReason};
use crate::auth::token;

/// Where unauthenticated navigation lands.
pub const SIGN_IN_ROUTE: &str = "sign-in";

/// Navigation decision for a blocked view. Carries the originally requested
/// view so the sign-in flow can return there afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: &'static str,
    pub from: Option<String>,
}

impl std::fmt::Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.from {
            Some(from) => write!(f, "redirect to {} (requested: {})", self.to, from),
            None => write!(f, "redirect to {}", self.to),
        }
    }
}

/// Whether a protected view may render for this session. Authorization is
/// decided purely by credential presence - never by the user profile.
pub fn can_enter(snapshot: &SessionSnapshot) -> bool {
    snapshot.is_authenticated
        && (snapshot.access_token.is_some() || snapshot.refresh_token.is_some())
}

pub struct RouteGuard {
    store: Arc<SessionStore>,
    lead_secs: i64,
}

impl RouteGuard {
    pub fn new(store: Arc<SessionStore>, lead_secs: i64) -> Self {
        Self { store, lead_secs }
    }

    /// Synchronous gate for a protected view.
    pub fn check(&self, requested: &str) -> Result<(), Redirect> {
        if can_enter(&self.store.snapshot()) {
            Ok(())
        } else {
            Err(Redirect { to: SIGN_IN_ROUTE, from: Some(requested.to_string()) })
        }
    }

    /// Background validity re-check on entering a protected view. Never
    /// blocks the caller; a failed check clears the session and the sign-out
    /// event does the rest.
    pub fn revalidate(&self) {
        let store = Arc::clone(&self.store);
        let lead_secs = self.lead_secs;
        tokio::spawn(async move {
            let snapshot = store.snapshot();
            if let Some(access) = snapshot.access_token.as_deref() {
                if snapshot.is_authenticated && token::is_expired(access, lead_secs) {
                    if let Err(e) = store.clear(SignOutReason::Expired) {
                        warn!(err = %e, "failed to clear session during revalidation");
                    }
                }
            }
        });
    }
}
