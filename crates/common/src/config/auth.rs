//! 身份认证配置
//!
//! Microsoft 账号 (MSA) → Xbox Live 用户令牌 → XSTS 令牌 三段式认证链的端点与刷新策略

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_client_id() -> String {
    "0000000048183522".to_string()
}

fn default_token_endpoint() -> String {
    "https://login.live.com/oauth20_token.srf".to_string()
}

fn default_device_code_endpoint() -> String {
    "https://login.live.com/oauth20_connect.srf".to_string()
}

fn default_user_auth_endpoint() -> String {
    "https://user.auth.xboxlive.com/user/authenticate".to_string()
}

fn default_xsts_endpoint() -> String {
    "https://xsts.auth.xboxlive.com/xsts/authorize".to_string()
}

fn default_relying_party() -> String {
    "http://xboxlive.com".to_string()
}

fn default_scope() -> String {
    "service::user.auth.xboxlive.com::MBI_SSL".to_string()
}

fn default_refresh_token_file() -> Option<PathBuf> {
    Some(PathBuf::from("cache/refresh_token"))
}

fn default_expiry_margin() -> u64 {
    300 // 5 分钟
}

fn default_max_refresh_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout() -> u64 {
    15
}

/// 身份认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OAuth client id
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// MSA token 端点（refresh_token 换取 access_token）
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,

    /// MSA 设备码登录端点（`login` 子命令使用）
    #[serde(default = "default_device_code_endpoint")]
    pub device_code_endpoint: String,

    /// Xbox Live 用户认证端点
    #[serde(default = "default_user_auth_endpoint")]
    pub user_auth_endpoint: String,

    /// XSTS 授权端点
    #[serde(default = "default_xsts_endpoint")]
    pub xsts_endpoint: String,

    /// XSTS relying party
    #[serde(default = "default_relying_party")]
    pub relying_party: String,

    /// OAuth scope
    #[serde(default = "default_scope")]
    pub scope: String,

    /// 直接写在配置里的 refresh token（可选，优先于缓存文件）
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// refresh token 缓存文件
    ///
    /// 每次刷新后轮换得到的新 refresh token 会写回此文件
    #[serde(default = "default_refresh_token_file")]
    pub refresh_token_file: Option<PathBuf>,

    /// 提前刷新的时间余量（秒）
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin_secs: u64,

    /// 瞬时错误的最大重试次数
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,

    /// 初始退避（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// 最大退避（毫秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            token_endpoint: default_token_endpoint(),
            device_code_endpoint: default_device_code_endpoint(),
            user_auth_endpoint: default_user_auth_endpoint(),
            xsts_endpoint: default_xsts_endpoint(),
            relying_party: default_relying_party(),
            scope: default_scope(),
            refresh_token: None,
            refresh_token_file: default_refresh_token_file(),
            expiry_margin_secs: default_expiry_margin(),
            max_refresh_attempts: default_max_refresh_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AuthConfig {
    pub fn expiry_margin(&self) -> Duration {
        Duration::from_secs(self.expiry_margin_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 是否配置了任何 refresh token 来源
    pub fn has_refresh_token_source(&self) -> bool {
        self.refresh_token
            .as_ref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
            || self
                .refresh_token_file
                .as_ref()
                .map(|p| p.exists())
                .unwrap_or(false)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("auth.token_endpoint", &self.token_endpoint),
            ("auth.device_code_endpoint", &self.device_code_endpoint),
            ("auth.user_auth_endpoint", &self.user_auth_endpoint),
            ("auth.xsts_endpoint", &self.xsts_endpoint),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                errors.push(format!("{field} must start with http:// or https://"));
            }
        }

        if self.client_id.trim().is_empty() {
            errors.push("auth.client_id cannot be empty".to_string());
        }

        if self.max_refresh_attempts == 0 {
            errors.push("auth.max_refresh_attempts must be at least 1".to_string());
        }

        if !self.has_refresh_token_source() {
            errors.push(
                "Warning: no refresh token configured; run `sessioncast login` first".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
