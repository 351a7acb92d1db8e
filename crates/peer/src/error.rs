//! Peer 协商错误类型
//!
//! 这里的错误只影响单个 peer，不会离开该 peer 的协商任务。

use crate::state::{NegotiationEvent, NegotiationState};
use sessioncast_common::error::ErrorSeverity;
use signaling::SignalingError;
use signaling::message::error_code;
use thiserror::Error;

/// 协商错误
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// 状态机收到了当前状态不接受的事件
    #[error("Invalid negotiation transition: {event:?} in state {from}")]
    InvalidTransition {
        from: NegotiationState,
        event: NegotiationEvent,
    },

    /// 协商超时
    #[error("Negotiation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// WebRTC 传输层错误
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// 信令发送失败
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// 远端发来 CONNECTERROR
    #[error("Remote peer reported failure code {code}")]
    RemoteFailure { code: u32 },

    /// 协商被取消（信令断开或桥接停止）
    #[error("Negotiation aborted")]
    Aborted,
}

impl NegotiationError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// 协商错误不重试：peer 需要重新发起 join
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Aborted | Self::RemoteFailure { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    /// 失败时回给远端的 CONNECTERROR 错误码；`None` 表示不必通知
    pub fn connect_error_code(&self) -> Option<u32> {
        match self {
            Self::Timeout { .. } => Some(error_code::NEGOTIATION_TIMEOUT),
            Self::InvalidTransition { .. } => Some(error_code::SIGNALING_PARSING_FAILURE),
            Self::Transport { .. } => Some(error_code::ICE),
            Self::Signaling(_) | Self::RemoteFailure { .. } | Self::Aborted => None,
        }
    }

    /// 指标标签
    pub fn metric_reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            _ => "error",
        }
    }
}

/// Data channel 收发错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Data channel is closed")]
    Closed,

    #[error("Failed to send on data channel: {reason}")]
    Send { reason: String },
}
