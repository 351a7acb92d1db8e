//! 会话目录 HTTP 客户端

use crate::descriptor::{SessionDescriptor, SessionHandle};
use crate::error::DirectoryError;
use async_trait::async_trait;
use auth::CredentialManager;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use sessioncast_common::Backoff;
use sessioncast_common::config::{DirectoryConfig, SessionConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONTRACT_VERSION: &str = "107";

/// 会话目录抽象，编排器只依赖此 trait
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// 以新的会话名创建记录
    async fn publish(&self, descriptor: &SessionDescriptor) -> Result<SessionHandle, DirectoryError>;

    /// 刷新记录可见性（单次尝试）
    async fn heartbeat(
        &self,
        handle: &mut SessionHandle,
        descriptor: &SessionDescriptor,
    ) -> Result<(), DirectoryError>;

    /// 移除本机成员身份；记录不存在视为已撤回
    async fn withdraw(&self, handle: &SessionHandle) -> Result<(), DirectoryError>;
}

/// 请求的前置条件
#[derive(Debug, Clone, Copy)]
enum Precondition {
    /// 仅当记录不存在时创建
    Create,
    /// 仅当记录存在时更新
    Update,
    None,
}

/// 会话目录客户端
pub struct DirectoryClient {
    client: reqwest::Client,
    credentials: Arc<CredentialManager>,
    config: DirectoryConfig,
    scid: String,
    template: String,
    retry_initial: Duration,
    retry_max: Duration,
}

impl DirectoryClient {
    pub fn new(
        config: &DirectoryConfig,
        session: &SessionConfig,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DirectoryError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            config: config.clone(),
            scid: session.service_config_id.clone(),
            template: session.template_name.clone(),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(10),
        })
    }

    /// 覆盖 publish / withdraw 的重试退避区间
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max;
        self
    }

    fn session_url(&self, name: &str) -> String {
        format!(
            "{}/serviceconfigs/{}/sessionTemplates/{}/sessions/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.scid,
            self.template,
            name
        )
    }

    /// 发送一次请求，401/403 时强制刷新令牌并重试一次
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        precondition: Precondition,
    ) -> Result<(), DirectoryError> {
        match self.send_once(method.clone(), url, body, precondition).await {
            Err(DirectoryError::Unauthorized { status }) => {
                warn!("Directory returned HTTP {}, forcing token refresh", status);
                self.credentials.force_refresh().await?;
                self.send_once(method, url, body, precondition).await
            }
            other => other,
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        precondition: Precondition,
    ) -> Result<(), DirectoryError> {
        let token = self.credentials.current_token().await?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", token.authorization())
            .header("x-xbl-contract-version", CONTRACT_VERSION)
            .header("Accept-Language", "en-US");

        request = match precondition {
            Precondition::Create => request.header("If-None-Match", "*"),
            Precondition::Update => request.header("If-Match", "*"),
            Precondition::None => request,
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, url);
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body, url))
    }

    async fn publish_with_retry(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<SessionHandle, DirectoryError> {
        let body = descriptor.to_body();
        let mut backoff = Backoff::new(self.retry_initial, self.retry_max);
        let mut name = new_session_name();
        let mut conflict_retried = false;

        loop {
            let url = self.session_url(&name);
            match self.send(Method::PUT, &url, Some(&body), Precondition::Create).await {
                Ok(()) => {
                    info!("Session {} published", name);
                    return Ok(SessionHandle::new(name));
                }
                Err(DirectoryError::Conflict { session }) if !conflict_retried => {
                    warn!("Session name {} already taken, regenerating", session);
                    conflict_retried = true;
                    name = new_session_name();
                }
                Err(e @ DirectoryError::Unavailable { .. })
                    if backoff.attempts() < self.config.max_retries =>
                {
                    let delay = backoff.next_delay();
                    warn!("Publish failed: {}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl SessionDirectory for DirectoryClient {
    async fn publish(&self, descriptor: &SessionDescriptor) -> Result<SessionHandle, DirectoryError> {
        self.publish_with_retry(descriptor).await
    }

    async fn heartbeat(
        &self,
        handle: &mut SessionHandle,
        descriptor: &SessionDescriptor,
    ) -> Result<(), DirectoryError> {
        let url = self.session_url(&handle.name);
        let body = descriptor.to_body();

        match self.send(Method::PUT, &url, Some(&body), Precondition::Update).await {
            Ok(()) => {
                handle.last_heartbeat = Utc::now();
                debug!("Heartbeat ok for session {}", handle.name);
                Ok(())
            }
            // 记录已过期或被替代
            Err(DirectoryError::Conflict { .. }) => Err(DirectoryError::SessionLost {
                session: handle.name.clone(),
            }),
            Err(DirectoryError::Rejected { status: 404, .. }) => Err(DirectoryError::SessionLost {
                session: handle.name.clone(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn withdraw(&self, handle: &SessionHandle) -> Result<(), DirectoryError> {
        let url = format!("{}/members/me", self.session_url(&handle.name));
        let mut backoff = Backoff::new(self.retry_initial, self.retry_max);

        loop {
            match self.send(Method::DELETE, &url, None, Precondition::None).await {
                Ok(()) => {
                    info!("Session {} withdrawn", handle.name);
                    return Ok(());
                }
                Err(DirectoryError::Rejected { status: 404, .. }) => {
                    debug!("Session {} already gone", handle.name);
                    return Ok(());
                }
                Err(e @ DirectoryError::Unavailable { .. })
                    if backoff.attempts() < self.config.max_retries =>
                {
                    let delay = backoff.next_delay();
                    warn!("Withdraw failed: {}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 新的会话名：大写 UUID
fn new_session_name() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

fn classify(status: StatusCode, body: String, url: &str) -> DirectoryError {
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => DirectoryError::Conflict {
            session: url.rsplit('/').next().unwrap_or_default().to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DirectoryError::Unauthorized {
            status: status.as_u16(),
        },
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            DirectoryError::unavailable(format!("HTTP {status}"))
        }
        _ => DirectoryError::Rejected {
            status: status.as_u16(),
            body,
        },
    }
}
