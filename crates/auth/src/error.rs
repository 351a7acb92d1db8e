//! 认证错误类型

use sessioncast_common::error::ErrorSeverity;
use thiserror::Error;

/// 认证错误
///
/// 对桥接而言所有认证错误都是致命的：刷新失败后无法继续维持会话。
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    // ========== 凭据错误 ==========
    /// 身份提供方拒绝了凭据（refresh token 无效或已撤销）
    #[error("Credentials rejected by identity provider: {reason}")]
    Rejected { reason: String },

    /// 未配置 refresh token
    #[error("No refresh token available; run `sessioncast login` first")]
    MissingRefreshToken,

    // ========== 刷新错误 ==========
    /// 瞬时错误重试耗尽
    #[error("Token refresh failed after {attempts} attempts: {last_error}")]
    RefreshExhausted { attempts: u32, last_error: String },

    /// 令牌格式无法解析
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    // ========== 设备码登录 ==========
    /// 用户未在有效期内完成授权
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,

    /// 用户拒绝授权
    #[error("Authorization declined by user")]
    AuthorizationDeclined,

    // ========== 其他 ==========
    /// refresh token 缓存文件读写失败
    #[error("Token cache error: {reason}")]
    Cache { reason: String },

    /// 通用错误
    #[error("Auth error: {message}")]
    General { message: String },
}

impl AuthError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// 认证错误在管理器内部已经做过重试，向外传播后不再重试
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cache { .. } => ErrorSeverity::Warning,
            Self::DeviceCodeExpired | Self::AuthorizationDeclined => ErrorSeverity::Error,
            _ => ErrorSeverity::Critical,
        }
    }
}
