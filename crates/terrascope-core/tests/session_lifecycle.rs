//! End-to-end session lifecycle scenarios against a loopback stub backend.
//!
//! The stub implements just enough of the service contract: login mints a
//! credential pair, refresh mints a new access credential, and the protected
//! projects endpoint accepts exactly one token at a time. Tests flip which
//! token the stub accepts to simulate server-side revocation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use terrascope_core::api::{ApiClient, ApiError};
use terrascope_core::auth::expiry::DEFAULT_LIVENESS_INTERVAL;
use terrascope_core::auth::{
    ExpiryScheduler, SchedulerState, SessionEvent, SessionStore, SessionSync, SignOutReason,
};
use terrascope_core::models::{User, UserRole};
use terrascope_core::storage::{StorageFile, StorageWatcher};

/// Fabricate a JWT-shaped token expiring `offset_secs` from now.
fn make_token(offset_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = chrono::Utc::now().timestamp() + offset_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

fn test_user() -> User {
    User {
        id: "8b1f2c3d-4e5a-46b7-8c9d-0e1f2a3b4c5d".to_string(),
        email: "dana@acme-geo.com".to_string(),
        first_name: "Dana".to_string(),
        last_name: "Reyes".to_string(),
        role: UserRole::Surveyor,
        client_id: None,
        active: Some(true),
        created_at: None,
    }
}

fn user_json() -> Value {
    json!({
        "id": "8b1f2c3d-4e5a-46b7-8c9d-0e1f2a3b4c5d",
        "email": "dana@acme-geo.com",
        "firstName": "Dana",
        "lastName": "Reyes",
        "role": "surveyor",
        "clientId": null,
        "active": true
    })
}

struct StubBackend {
    refresh_calls: AtomicU32,
    protected_calls: AtomicU32,
    /// The one access token the protected endpoint currently accepts.
    accepted_token: Mutex<Option<String>>,
    /// Whether a refreshed token becomes the accepted one.
    accept_refreshed: bool,
    /// Whether the refresh endpoint rejects outright.
    fail_refresh: bool,
    /// Artificial latency on refresh, so concurrent failures pile up.
    refresh_delay: Duration,
}

impl StubBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
            accepted_token: Mutex::new(None),
            accept_refreshed: true,
            fail_refresh: false,
            refresh_delay: Duration::ZERO,
        })
    }

    fn with(accept_refreshed: bool, fail_refresh: bool, refresh_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
            accepted_token: Mutex::new(None),
            accept_refreshed,
            fail_refresh,
            refresh_delay,
        })
    }

    fn revoke_current_token(&self) {
        *self.accepted_token.lock().expect("lock") = Some("server-side-revoked".to_string());
    }
}

async fn login_handler(State(stub): State<Arc<StubBackend>>) -> Json<Value> {
    let access = make_token(300);
    let refresh = make_token(86400);
    *stub.accepted_token.lock().expect("lock") = Some(access.clone());
    Json(json!({
        "accessToken": access,
        "refreshToken": refresh,
        "user": user_json(),
    }))
}

async fn refresh_handler(State(stub): State<Arc<StubBackend>>) -> Response {
    stub.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(stub.refresh_delay).await;
    if stub.fail_refresh {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid refresh token"})))
            .into_response();
    }
    let access = make_token(300);
    if stub.accept_refreshed {
        *stub.accepted_token.lock().expect("lock") = Some(access.clone());
    }
    Json(json!({ "accessToken": access })).into_response()
}

async fn projects_handler(State(stub): State<Arc<StubBackend>>, headers: HeaderMap) -> Response {
    stub.protected_calls.fetch_add(1, Ordering::SeqCst);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|tok| stub.accepted_token.lock().expect("lock").as_deref() == Some(tok))
        .unwrap_or(false);
    if authorized {
        Json(json!([])).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
    }
}

async fn spawn_backend(stub: Arc<StubBackend>) -> String {
    let router = Router::new()
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/projects", get(projects_handler))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn open_store(dir: &std::path::Path) -> Arc<SessionStore> {
    Arc::new(SessionStore::open(StorageFile::new(dir.to_path_buf()).expect("storage")))
}

#[tokio::test]
async fn login_establishes_session_and_arms_scheduler() {
    let stub = StubBackend::new();
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");
    let mut events = store.events();

    let user = client.login("dana@acme-geo.com", "hunter2").await.expect("login");
    assert_eq!(user.full_name(), "Dana Reyes");
    assert!(store.snapshot().is_authenticated);
    assert_eq!(events.recv().await, Ok(SessionEvent::SignedIn));

    // Scheduler arms for roughly expiry minus the 30s lead
    let scheduler = ExpiryScheduler::new(Arc::clone(&store), 30, DEFAULT_LIVENESS_INTERVAL);
    let mut state = scheduler.state();
    let handle = tokio::spawn(scheduler.run());
    state.wait_for(|s| matches!(s, SchedulerState::Armed { .. })).await.expect("armed");
    match *state.borrow() {
        SchedulerState::Armed { fire_in } => {
            let secs = fire_in.as_secs();
            assert!((260..=270).contains(&secs), "armed for {secs}s");
        }
        SchedulerState::Idle => panic!("scheduler should be armed"),
    }
    handle.abort();
}

#[tokio::test]
async fn silent_refresh_replays_original_request() {
    let stub = StubBackend::new();
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");

    client.login("dana@acme-geo.com", "hunter2").await.expect("login");
    let mut events = store.events();

    // The server stops accepting the current token (revocation); the local
    // clock still considers it valid, so the pre-flight check passes.
    stub.revoke_current_token();

    let projects = client.list_projects().await.expect("request should succeed after refresh");
    assert!(projects.is_empty());
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    // Original attempt plus exactly one replay
    assert_eq!(stub.protected_calls.load(Ordering::SeqCst), 2);

    // The session stayed alive: a refresh event, no sign-out
    assert_eq!(events.try_recv(), Ok(SessionEvent::Refreshed));
    assert!(events.try_recv().is_err());
    assert!(store.snapshot().is_authenticated);
}

#[tokio::test]
async fn concurrent_auth_failures_share_one_refresh() {
    // Slow refresh so all five requests fail before the first refresh lands
    let stub = StubBackend::with(true, false, Duration::from_millis(150));
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");

    client.login("dana@acme-geo.com", "hunter2").await.expect("login");
    stub.revoke_current_token();

    let results = futures::future::join_all((0..5).map(|_| client.list_projects())).await;
    for result in results {
        assert!(result.is_ok(), "all callers resolve via the shared refresh: {result:?}");
    }
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1, "refresh must be single-flight");
    assert!(store.snapshot().is_authenticated);
}

#[tokio::test]
async fn replayed_request_is_never_refreshed_twice() {
    // Refresh succeeds but the server keeps rejecting the replay
    let stub = StubBackend::with(false, false, Duration::ZERO);
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");

    client.login("dana@acme-geo.com", "hunter2").await.expect("login");
    let mut events = store.events();
    stub.revoke_current_token();

    let err = client.list_projects().await.expect_err("replay is rejected");
    assert!(matches!(err, ApiError::AuthRejected), "got {err:?}");
    assert!(err.requires_sign_in());

    // One refresh, one replay - then the request fails for good
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.protected_calls.load(Ordering::SeqCst), 2);

    // Rejected session ends in a sign-out, never a half-authenticated state
    assert!(!store.snapshot().is_authenticated);
    let mut saw_sign_out = false;
    while let Ok(event) = events.try_recv() {
        if event == (SessionEvent::SignedOut { reason: SignOutReason::Rejected }) {
            saw_sign_out = true;
        }
    }
    assert!(saw_sign_out);
}

#[tokio::test]
async fn refresh_failure_forces_sign_out() {
    let stub = StubBackend::with(true, true, Duration::ZERO);
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");

    client.login("dana@acme-geo.com", "hunter2").await.expect("login");
    let mut events = store.events();
    stub.revoke_current_token();

    let err = client.list_projects().await.expect_err("refresh is rejected");
    assert!(matches!(err, ApiError::RefreshFailed(_)), "got {err:?}");
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!store.snapshot().is_authenticated);
    assert_eq!(
        events.recv().await,
        Ok(SessionEvent::SignedOut { reason: SignOutReason::Rejected })
    );
}

#[tokio::test]
async fn expired_credential_is_never_sent() {
    let stub = StubBackend::new();
    let base_url = spawn_backend(Arc::clone(&stub)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let client = ApiClient::new(base_url, Arc::clone(&store), 30).expect("client");

    // A stored session whose access credential has already expired
    store
        .set_credentials(make_token(-10), make_token(86400), test_user())
        .expect("set credentials");

    let err = client.list_projects().await.expect_err("pre-flight should abort");
    assert!(matches!(err, ApiError::AuthExpired), "got {err:?}");
    assert!(err.requires_sign_in());
    // The request never reached the wire
    assert_eq!(stub.protected_calls.load(Ordering::SeqCst), 0);
    assert!(!store.snapshot().is_authenticated);
}

#[tokio::test]
async fn cross_context_logout_propagates_through_storage() {
    let dir = tempfile::tempdir().expect("tempdir");

    // Context A signs in
    let store_a = open_store(dir.path());
    store_a
        .set_credentials(make_token(300), make_token(86400), test_user())
        .expect("set credentials");

    // Context B opens the same storage and starts its sync task
    let store_b = open_store(dir.path());
    assert!(store_b.snapshot().is_authenticated);
    let storage_b = StorageFile::new(dir.path().to_path_buf()).expect("storage");
    let watcher = StorageWatcher::new(&storage_b).expect("watcher");
    let _sync = SessionSync::spawn(Arc::clone(&store_b), watcher);
    let mut events_b = store_b.events();

    // Context A signs out; B observes it through the storage event alone
    store_a.clear(SignOutReason::UserRequested).expect("clear");

    let event = tokio::time::timeout(Duration::from_secs(5), events_b.recv())
        .await
        .expect("storage event should arrive")
        .expect("event");
    assert_eq!(event, SessionEvent::SignedOut { reason: SignOutReason::ExternalContext });
    assert!(!store_b.snapshot().is_authenticated);
}
