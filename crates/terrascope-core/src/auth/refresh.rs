//! Single-flight silent token refresh.
//!
//! Any number of requests can fail authorization at the same moment; only
//! one refresh call may be on the wire. Callers serialize on an async mutex
//! and re-check the store after acquiring it, so late arrivals adopt the
//! token minted by the first caller instead of hitting the endpoint again.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::session::{SessionStore, SignOutReason};
use crate::auth::token;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    lock: Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a usable access credential after `stale_token` was rejected.
    ///
    /// Holds the coordinator lock across the endpoint call. After acquiring
    /// it, the store is consulted first: if someone else already replaced
    /// the stale token with a live one, that token is returned without any
    /// network traffic.
    ///
    /// A missing/expired refresh credential or a rejected refresh call is
    /// terminal: the store is cleared and the error propagates.
    pub async fn fresh_access_token(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        store: &SessionStore,
        stale_token: &str,
        lead_secs: i64,
    ) -> Result<String, ApiError> {
        let _guard = self.lock.lock().await;

        let snapshot = store.snapshot();
        if let Some(access) = snapshot.access_token.as_deref() {
            if access != stale_token && !token::is_expired(access, lead_secs) {
                debug!("adopting access token refreshed by a concurrent request");
                return Ok(access.to_owned());
            }
        }

        let refresh_token = match snapshot.refresh_token {
            Some(ref t) if !token::is_expired(t, lead_secs) => t.clone(),
            _ => {
                self.force_sign_out(store);
                return Err(ApiError::RefreshFailed(
                    "refresh credential missing or expired".to_string(),
                ));
            }
        };

        debug!("refreshing access token");
        let url = format!("{base_url}/auth/refresh");
        let response = http
            .post(&url)
            .json(&RefreshRequest { refresh_token: &refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "token refresh rejected");
            self.force_sign_out(store);
            return Err(ApiError::RefreshFailed(format!("refresh endpoint returned {status}")));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {e}")))?;
        store
            .set_access_token(parsed.access_token.clone())
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(parsed.access_token)
    }

    fn force_sign_out(&self, store: &SessionStore) {
        if let Err(e) = store.clear(SignOutReason::Rejected) {
            warn!(err = %e, "failed to clear session after refresh failure");
        }
    }
}
