//! 桥接生命周期状态

use std::fmt;

/// Starting → Advertising → Stopping → Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    Starting,
    /// 会话已发布并在心跳，信令通道已打开，接受 peer
    Advertising,
    /// 正在撤回会话并排空 peer 连接
    Stopping,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Advertising => "advertising",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// `run()` 的终止状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    /// 收到停止请求后正常退出
    Stopped,
    /// 因致命错误退出
    Failed(String),
}

impl BridgeExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for BridgeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_display() {
        assert_eq!(BridgeExit::Stopped.to_string(), "stopped");
        let failed = BridgeExit::Failed("token rejected".to_string());
        assert!(failed.is_failure());
        assert_eq!(failed.to_string(), "failed: token rejected");
        assert_eq!(BridgeState::Advertising.to_string(), "advertising");
    }
}
