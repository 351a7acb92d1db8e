//! 设备码登录
//!
//! 首次运行时没有 refresh token，需要用户在浏览器中输入设备码授权。
//! 成功后把 refresh token 写入缓存文件，之后的启动不再需要交互。

use crate::error::AuthError;
use crate::manager::store_refresh_token;
use serde::Deserialize;
use sessioncast_common::config::AuthConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// 设备码授权请求的结果
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub user_code: String,
    pub device_code: String,
    pub verification_uri: String,
    /// 有效期（秒）
    pub expires_in: u64,
    /// 轮询间隔（秒）
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 设备码登录客户端
pub struct DeviceCodeLogin {
    client: reqwest::Client,
    config: AuthConfig,
}

impl DeviceCodeLogin {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AuthError::general(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 申请设备码
    pub async fn request_device_code(&self) -> Result<DeviceCode, AuthError> {
        let response = self
            .client
            .post(&self.config.device_code_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("response_type", "device_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::general(format!("Device code request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::rejected(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::invalid_token(format!("Malformed device code response: {e}")))
    }

    /// 轮询直到用户完成授权，返回 refresh token
    pub async fn poll_device_code(&self, code: &DeviceCode) -> Result<String, AuthError> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);

        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::DeviceCodeExpired);
            }
            tokio::time::sleep(interval).await;

            let response = self
                .client
                .post(&self.config.token_endpoint)
                .form(&[
                    ("client_id", self.config.client_id.as_str()),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("device_code", code.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| AuthError::general(format!("Device code poll failed: {e}")))?;

            // 未授权时端点返回 400 + error 字段
            let poll: PollResponse = response.json().await.map_err(|e| {
                AuthError::invalid_token(format!("Malformed device code poll response: {e}"))
            })?;

            if let Some(refresh_token) = poll.refresh_token {
                info!("Device code authorization completed");
                return Ok(refresh_token);
            }

            match poll.error.as_deref() {
                Some("authorization_pending") => debug!("Waiting for user authorization"),
                Some("slow_down") => interval += Duration::from_secs(5),
                Some("expired_token") => return Err(AuthError::DeviceCodeExpired),
                Some("authorization_declined") | Some("access_denied") => {
                    return Err(AuthError::AuthorizationDeclined);
                }
                Some(other) => return Err(AuthError::rejected(other.to_string())),
                None => return Err(AuthError::invalid_token("poll response has no token")),
            }
        }
    }

    /// 完整登录流程：申请设备码、提示用户、轮询、写入缓存
    ///
    /// `prompt` 负责把验证地址和用户码展示给用户
    pub async fn login<F>(&self, prompt: F) -> Result<String, AuthError>
    where
        F: FnOnce(&DeviceCode),
    {
        let code = self.request_device_code().await?;
        prompt(&code);

        let refresh_token = self.poll_device_code(&code).await?;
        if let Some(path) = &self.config.refresh_token_file {
            store_refresh_token(path, &refresh_token).await?;
        }
        Ok(refresh_token)
    }
}
