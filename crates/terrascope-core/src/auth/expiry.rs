//! Proactive session expiry scheduling.
//!
//! Waiting for a request to fail is the reactive path; this module ends the
//! session slightly *before* the access credential expires. One task arms a
//! timer for `expiry - lead` and re-arms it on every store change. A
//! fixed-interval liveness poll runs the same expiry test independently -
//! deliberate duplication that catches clock drift and missed timer edges,
//! not an accident.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::session::{SessionStore, SignOutReason};
use crate::auth::token;

/// How often the liveness poll re-runs the expiry test.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Scheduler status, published for display and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No live session; no timer armed.
    Idle,
    /// Timer armed to fire `fire_in` after the last (re-)arm.
    Armed { fire_in: Duration },
}

pub struct ExpiryScheduler {
    store: Arc<SessionStore>,
    lead_secs: i64,
    liveness_interval: Duration,
    state_tx: watch::Sender<SchedulerState>,
}

impl ExpiryScheduler {
    pub fn new(store: Arc<SessionStore>, lead_secs: i64, liveness_interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self { store, lead_secs, liveness_interval, state_tx }
    }

    /// Watch channel over the scheduler's armed/idle state.
    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Drive the scheduler until the store is dropped. Every store change
    /// disarms the current timer and re-arms from the new snapshot, so a
    /// stale timer can never fire into a newer session.
    pub async fn run(self) {
        let mut changes = self.store.subscribe();
        let mut liveness = tokio::time::interval(self.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.arm();
            let timer = async {
                match deadline {
                    Some(fire_in) => tokio::time::sleep(fire_in).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        // Store dropped; nothing left to schedule.
                        return;
                    }
                    // Disarmed: the next loop turn re-arms from the new state.
                }
                _ = timer => {
                    self.fire("armed timer elapsed");
                }
                _ = liveness.tick() => {
                    // Defense in depth against clock drift and missed timers
                    self.fire("liveness poll");
                }
            }
        }
    }

    /// Compute and publish the current timer state. Returns the delay to
    /// sleep for, or `None` when idle.
    fn arm(&self) -> Option<Duration> {
        let snapshot = self.store.snapshot();
        let access = match snapshot.access_token.as_deref() {
            Some(access) if snapshot.is_authenticated => access,
            _ => {
                self.state_tx.send_replace(SchedulerState::Idle);
                return None;
            }
        };

        let fire_in = (token::time_until_expiry(access)
            - chrono::Duration::seconds(self.lead_secs))
        .max(chrono::Duration::zero())
        .to_std()
        .unwrap_or_default();

        debug!(fire_in_secs = fire_in.as_secs(), "expiry timer armed");
        self.state_tx.send_replace(SchedulerState::Armed { fire_in });
        Some(fire_in)
    }

    /// End the session if the *current* credential really is inside the lead
    /// window. The re-check means a timer racing a fresh sign-in or refresh
    /// can never clear the newer session.
    fn fire(&self, cause: &str) {
        let snapshot = self.store.snapshot();
        let Some(access) = snapshot.access_token.as_deref() else { return };
        if !snapshot.is_authenticated || !token::is_expired(access, self.lead_secs) {
            return;
        }
        info!(cause, "access credential expiring, ending session");
        if let Err(e) = self.store.clear(SignOutReason::Expired) {
            warn!(err = %e, "failed to clear session on expiry");
        }
    }
}

/// One immediate validation of durably-stored credentials, run before the
/// application becomes interactive. Returns `true` when a live session was
/// restored; absent or expired credentials clear the store (so sibling
/// contexts observe it) and short-circuit to the sign-in redirect.
pub fn check_persisted(store: &SessionStore, lead_secs: i64) -> Result<bool> {
    let snapshot = store.snapshot();
    if !snapshot.is_authenticated {
        return Ok(false);
    }
    match snapshot.access_token.as_deref() {
        Some(access) if !token::is_expired(access, lead_secs) => Ok(true),
        _ => {
            info!("stored credentials expired, ending session");
            store.clear(SignOutReason::Expired)?;
            Ok(false)
        }
    }
}
