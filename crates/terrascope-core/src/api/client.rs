//! API client for the Terrascope survey service.
//!
//! Every request passes through the session interceptors:
//!
//! - outbound: the current access credential is attached as a bearer header,
//!   unless it is already known to be expired - then the request is aborted
//!   locally and the session ends without any network traffic
//! - inbound: an authorization failure triggers at most one silent refresh
//!   (single-flight across concurrent requests) and one replay; a second
//!   failure is terminal
//!
//! Rate limiting (429) is retried with exponential backoff below the
//! interceptors, so a replayed request retries 429s on its own.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::refresh::RefreshCoordinator;
use crate::auth::session::{SessionStore, SignOutReason};
use crate::auth::token;
use crate::models::{
    Client, ClientUpdate, Layer, NewClient, NewProject, NewUser, NewWorkspace, ProfileUpdate,
    Project, ProjectUpdate, User, Workspace, WorkspaceUpdate,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    user: User,
}

/// API client for the survey service. One inner `reqwest::Client` shares a
/// connection pool across every call.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<SessionStore>,
    refresh: RefreshCoordinator,
    lead_secs: i64,
}

impl ApiClient {
    pub fn new(base_url: String, store: Arc<SessionStore>, lead_secs: i64) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            refresh: RefreshCoordinator::new(),
            lead_secs,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // ===== Session actions =====

    /// Authenticate and establish a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let url = format!("{}/auth/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let auth: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {e}")))?;

        self.store
            .set_credentials(auth.access_token, auth.refresh_token, auth.user.clone())
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        debug!(user = %auth.user.email, "signed in");
        Ok(auth.user)
    }

    /// End the session. Server-side revocation is best effort; the local
    /// session is cleared regardless.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(access) = self.store.snapshot().access_token {
            let url = format!("{}/auth/logout", self.base_url);
            if let Err(e) = self.http.post(&url).bearer_auth(&access).send().await {
                debug!(err = %e, "logout request failed, clearing local session anyway");
            }
        }
        self.store
            .clear(SignOutReason::UserRequested)
            .map_err(|e| ApiError::Storage(e.to_string()))
    }

    /// Re-fetch the current user's profile and update the session's copy.
    pub async fn refresh_profile(&self) -> Result<User, ApiError> {
        let profile: User = self.get("/profile").await?;
        self.store.set_user(profile.clone()).map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(profile)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let profile: User = self.patch("/profile", update).await?;
        self.store.set_user(profile.clone()).map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(profile)
    }

    // ===== Projects =====

    pub async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.get("/projects").await
    }

    pub async fn fetch_project(&self, id: &str) -> Result<Project, ApiError> {
        self.get(&format!("/projects/{id}")).await
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        self.post("/projects", project).await
    }

    pub async fn update_project(&self, id: &str, update: &ProjectUpdate) -> Result<Project, ApiError> {
        self.patch(&format!("/projects/{id}"), update).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/projects/{id}")).await
    }

    /// Map layers attached to a project, for the viewer panel.
    pub async fn fetch_project_layers(&self, id: &str) -> Result<Vec<Layer>, ApiError> {
        self.get(&format!("/projects/{id}/layers")).await
    }

    // ===== Clients =====

    pub async fn list_clients(&self) -> Result<Vec<Client>, ApiError> {
        self.get("/clients").await
    }

    pub async fn create_client(&self, client: &NewClient) -> Result<Client, ApiError> {
        self.post("/clients", client).await
    }

    pub async fn update_client(&self, id: &str, update: &ClientUpdate) -> Result<Client, ApiError> {
        self.patch(&format!("/clients/{id}"), update).await
    }

    pub async fn delete_client(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/clients/{id}")).await
    }

    // ===== Users =====

    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/users").await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        self.post("/users", user).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/users/{id}")).await
    }

    // ===== Workspaces =====

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>, ApiError> {
        self.get("/workspaces").await
    }

    pub async fn create_workspace(&self, workspace: &NewWorkspace) -> Result<Workspace, ApiError> {
        self.post("/workspaces", workspace).await
    }

    pub async fn update_workspace(
        &self,
        id: &str,
        update: &WorkspaceUpdate,
    ) -> Result<Workspace, ApiError> {
        self.patch(&format!("/workspaces/{id}"), update).await
    }

    pub async fn delete_workspace(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/workspaces/{id}")).await
    }

    // ===== Request plumbing =====

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(Method::GET, path, None::<&()>).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_with_reauth(Method::DELETE, path, None::<&()>).await.map(|_| ())
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let response = self.send_with_reauth(method, path, body).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("response from {path}: {e}")))
    }

    /// Send one logical request through both session interceptors.
    async fn send_with_reauth<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError> {
        // Pre-flight: never send a credential already known to be expired.
        let bearer = match self.store.snapshot().access_token {
            Some(access) if token::is_expired(&access, self.lead_secs) => {
                debug!(path, "access credential expired before dispatch");
                if let Err(e) = self.store.clear(SignOutReason::Expired) {
                    warn!(err = %e, "failed to clear session on pre-flight expiry");
                }
                return Err(ApiError::AuthExpired);
            }
            other => other,
        };

        let mut response = self.dispatch(method.clone(), path, body, bearer.as_deref()).await?;

        if matches!(response.status().as_u16(), 401 | 403) {
            if let Some(stale) = bearer {
                // One refresh, one replay. The coordinator makes the refresh
                // single-flight across concurrent failures.
                debug!(path, status = %response.status(), "authorization failure, refreshing");
                let fresh = self
                    .refresh
                    .fresh_access_token(&self.http, &self.base_url, &self.store, &stale, self.lead_secs)
                    .await?;
                response = self.dispatch(method, path, body, Some(fresh.as_str())).await?;
                if matches!(response.status().as_u16(), 401 | 403) {
                    // The replayed request is never refreshed a second time.
                    warn!(path, "authorization failure after refresh, ending session");
                    if let Err(e) = self.store.clear(SignOutReason::Rejected) {
                        warn!(err = %e, "failed to clear session after rejected replay");
                    }
                    return Err(ApiError::AuthRejected);
                }
            }
        }

        Self::check_response(response).await
    }

    /// Single dispatch with rate-limit backoff.
    async fn dispatch<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            if response.status().as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms, "rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }
            return Ok(response);
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}
