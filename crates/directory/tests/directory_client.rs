//! DirectoryClient 集成测试（axum 模拟目录服务）

use async_trait::async_trait;
use auth::{CredentialManager, IdentityProvider, IdentityToken, ProviderError};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, put};
use axum::{Json, Router};
use chrono::Utc;
use directory::{DirectoryClient, DirectoryError, SessionDescriptor, SessionDirectory};
use serde_json::Value;
use sessioncast_common::NetworkId;
use sessioncast_common::config::{AuthConfig, DirectoryConfig, SessionConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// 每次刷新签发 `XBL3.0 x=1;token-N`
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for CountingProvider {
    async fn refresh(&self, _refresh_token: &str) -> Result<IdentityToken, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IdentityToken::new(
            format!("XBL3.0 x=1;token-{n}"),
            Utc::now() + chrono::Duration::hours(1),
            "refresh",
        ))
    }
}

#[derive(Default)]
struct MockDirectory {
    sessions: Mutex<HashMap<String, Value>>,
    /// 依次覆盖下一次请求的响应码
    script: Mutex<VecDeque<StatusCode>>,
    /// 只接受此令牌，None 表示任意
    accepted_token: Mutex<Option<String>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockDirectory {
    fn scripted(&self) -> Option<StatusCode> {
        self.script.lock().unwrap().pop_front()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match self.accepted_token.lock().unwrap().as_ref() {
            Some(expected) => *expected == presented,
            None => presented.starts_with("XBL3.0 x="),
        }
    }
}

async fn put_session(
    State(mock): State<Arc<MockDirectory>>,
    Path((_scid, _template, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    mock.requests.lock().unwrap().push(("PUT".to_string(), name.clone()));
    assert_eq!(headers["x-xbl-contract-version"], "107");

    if let Some(status) = mock.scripted() {
        return status;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }

    let mut sessions = mock.sessions.lock().unwrap();
    let exists = sessions.contains_key(&name);
    if headers.contains_key("if-none-match") && exists {
        return StatusCode::PRECONDITION_FAILED;
    }
    if headers.contains_key("if-match") && !exists {
        return StatusCode::NOT_FOUND;
    }
    sessions.insert(name, body);
    StatusCode::OK
}

async fn delete_member(
    State(mock): State<Arc<MockDirectory>>,
    Path((_scid, _template, name)): Path<(String, String, String)>,
) -> StatusCode {
    mock.requests.lock().unwrap().push(("DELETE".to_string(), name.clone()));
    if let Some(status) = mock.scripted() {
        return status;
    }
    match mock.sessions.lock().unwrap().remove(&name) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

struct Fixture {
    mock: Arc<MockDirectory>,
    provider: Arc<CountingProvider>,
    client: DirectoryClient,
    descriptor: SessionDescriptor,
}

async fn fixture() -> Fixture {
    let mock = Arc::new(MockDirectory::default());
    let app = Router::new()
        .route(
            "/serviceconfigs/{scid}/sessionTemplates/{template}/sessions/{name}",
            put(put_session),
        )
        .route(
            "/serviceconfigs/{scid}/sessionTemplates/{template}/sessions/{name}/members/me",
            delete(delete_member),
        )
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let provider = Arc::new(CountingProvider::default());
    let credentials = Arc::new(CredentialManager::new(
        provider.clone(),
        AuthConfig {
            refresh_token_file: None,
            ..Default::default()
        },
        "refresh",
    ));

    let config = DirectoryConfig {
        endpoint: format!("http://{addr}"),
        max_retries: 2,
        ..Default::default()
    };
    let session = SessionConfig::default();
    let client = DirectoryClient::new(&config, &session, credentials)
        .unwrap()
        .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5));

    Fixture {
        mock,
        provider,
        client,
        descriptor: SessionDescriptor::from_config(&session, NetworkId::new(987654321)),
    }
}

#[tokio::test]
async fn test_publish_creates_record() {
    let f = fixture().await;
    let handle = f.client.publish(&f.descriptor).await.unwrap();

    assert_eq!(handle.name, handle.name.to_uppercase());
    let sessions = f.mock.sessions.lock().unwrap();
    let body = &sessions[&handle.name];
    assert_eq!(
        body["properties"]["custom"]["SupportedConnections"][0]["WebRTCNetworkId"],
        987654321u64
    );
    assert_eq!(body["properties"]["custom"]["hostName"], "Sessioncast");
}

#[tokio::test]
async fn test_publish_conflict_regenerates_name_once() {
    let f = fixture().await;
    f.mock
        .script
        .lock()
        .unwrap()
        .push_back(StatusCode::PRECONDITION_FAILED);

    let handle = f.client.publish(&f.descriptor).await.unwrap();
    let requests = f.mock.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].1, requests[1].1);
    assert_eq!(handle.name, requests[1].1);
}

#[tokio::test]
async fn test_publish_second_conflict_fails() {
    let f = fixture().await;
    f.mock
        .script
        .lock()
        .unwrap()
        .extend([StatusCode::CONFLICT, StatusCode::CONFLICT]);

    let err = f.client.publish(&f.descriptor).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Conflict { .. }));
}

#[tokio::test]
async fn test_unauthorized_forces_token_refresh() {
    let f = fixture().await;
    *f.mock.accepted_token.lock().unwrap() = Some("XBL3.0 x=1;token-2".to_string());

    f.client.publish(&f.descriptor).await.unwrap();
    assert_eq!(f.provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_publish_retries_unavailable() {
    let f = fixture().await;
    f.mock.script.lock().unwrap().extend([
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::TOO_MANY_REQUESTS,
    ]);

    let handle = f.client.publish(&f.descriptor).await.unwrap();
    assert!(f.mock.sessions.lock().unwrap().contains_key(&handle.name));
    assert_eq!(f.mock.requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_publish_gives_up_after_max_retries() {
    let f = fixture().await;
    f.mock
        .script
        .lock()
        .unwrap()
        .extend([StatusCode::BAD_GATEWAY; 5]);

    let err = f.client.publish(&f.descriptor).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable { .. }));
    // 首次 + max_retries(2)
    assert_eq!(f.mock.requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_heartbeat_updates_and_detects_loss() {
    let f = fixture().await;
    let mut handle = f.client.publish(&f.descriptor).await.unwrap();
    let published = handle.last_heartbeat;

    tokio::time::sleep(Duration::from_millis(5)).await;
    f.client.heartbeat(&mut handle, &f.descriptor).await.unwrap();
    assert!(handle.last_heartbeat > published);

    // 服务端丢弃记录
    f.mock.sessions.lock().unwrap().clear();
    let err = f.client.heartbeat(&mut handle, &f.descriptor).await.unwrap_err();
    assert!(matches!(err, DirectoryError::SessionLost { .. }));
}

#[tokio::test]
async fn test_heartbeat_is_single_attempt() {
    let f = fixture().await;
    let mut handle = f.client.publish(&f.descriptor).await.unwrap();
    f.mock
        .script
        .lock()
        .unwrap()
        .push_back(StatusCode::SERVICE_UNAVAILABLE);

    let err = f.client.heartbeat(&mut handle, &f.descriptor).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable { .. }));
    assert_eq!(f.mock.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_withdraw_is_idempotent() {
    let f = fixture().await;
    let handle = f.client.publish(&f.descriptor).await.unwrap();

    f.client.withdraw(&handle).await.unwrap();
    assert!(f.mock.sessions.lock().unwrap().is_empty());

    // 404 视为已撤回
    f.client.withdraw(&handle).await.unwrap();
}

#[tokio::test]
async fn test_other_client_errors_are_rejected() {
    let f = fixture().await;
    f.mock
        .script
        .lock()
        .unwrap()
        .push_back(StatusCode::BAD_REQUEST);

    let err = f.client.publish(&f.descriptor).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Rejected { status: 400, .. }));
    assert!(err.is_fatal());
}
