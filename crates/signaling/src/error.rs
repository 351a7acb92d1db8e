//! 信令错误类型

use auth::AuthError;
use sessioncast_common::error::ErrorSeverity;
use thiserror::Error;

/// 信令错误
#[derive(Error, Debug)]
pub enum SignalingError {
    /// 当前未连接，消息已丢弃
    #[error("Signaling channel is disconnected")]
    Disconnected,

    /// 建立连接失败
    #[error("Failed to connect to signaling service: {reason}")]
    Connect { reason: String },

    /// 帧或信令文本格式错误（只在读循环内部记录，不向外传播）
    #[error("Malformed signaling message: {reason}")]
    Malformed { reason: String },

    /// 事件流已经被取走
    #[error("Signaling events already taken")]
    EventsTaken,

    /// WebSocket 协议错误
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 获取令牌失败
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl SignalingError {
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// 检查是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Connect { .. } | Self::WebSocket(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Auth(_) => ErrorSeverity::Critical,
            Self::EventsTaken => ErrorSeverity::Error,
            Self::Malformed { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }
}
