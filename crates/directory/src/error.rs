//! 目录服务错误类型

use auth::AuthError;
use sessioncast_common::error::ErrorSeverity;
use thiserror::Error;

/// 目录服务错误
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// 会话名冲突（409/412），publish 会换一个名字重试一次
    #[error("Session name conflict: {session}")]
    Conflict { session: String },

    /// 令牌被拒绝（401/403），强制刷新令牌后重试一次
    #[error("Directory rejected the identity token (HTTP {status})")]
    Unauthorized { status: u16 },

    /// 服务不可用（5xx、429、网络错误）
    #[error("Directory service unavailable: {reason}")]
    Unavailable { reason: String },

    /// 心跳时记录已不存在（过期或被替代），需要重新发布
    #[error("Session record lost: {session}")]
    SessionLost { session: String },

    /// 其余 4xx
    #[error("Directory rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// 令牌获取失败，对桥接是致命的
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl DirectoryError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// 检查是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Unauthorized { .. } | Self::Unavailable { .. }
        )
    }

    /// 是否需要停止整个桥接
    pub fn is_fatal(&self) -> bool {
        self.severity().is_fatal()
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Auth(_) | Self::Rejected { .. } => ErrorSeverity::Critical,
            Self::SessionLost { .. } | Self::Unavailable { .. } | Self::Unauthorized { .. } => {
                ErrorSeverity::Warning
            }
            Self::Conflict { .. } => ErrorSeverity::Info,
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        Self::unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DirectoryError::unavailable("HTTP 503").is_retryable());
        assert!(!DirectoryError::unavailable("HTTP 503").is_fatal());

        let lost = DirectoryError::SessionLost {
            session: "ABC".to_string(),
        };
        assert!(!lost.is_retryable());
        assert!(!lost.is_fatal());

        let auth: DirectoryError = AuthError::MissingRefreshToken.into();
        assert!(auth.is_fatal());
        assert!(
            DirectoryError::Rejected {
                status: 400,
                body: String::new()
            }
            .is_fatal()
        );
    }
}
