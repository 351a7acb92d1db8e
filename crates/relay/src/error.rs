//! 中继错误类型

use sessioncast_common::PeerId;
use sessioncast_common::error::ErrorSeverity;
use thiserror::Error;

/// 中继错误，只影响单个 peer
#[derive(Error, Debug)]
pub enum RelayError {
    /// 本地 socket 绑定或连接失败
    #[error("Failed to open relay socket to {server}: {source}")]
    Socket {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay route for {peer} already exists")]
    DuplicateRoute { peer: PeerId },

    #[error("Relay engine is shutting down")]
    ShuttingDown,

    #[error("Invalid relay server address '{address}'")]
    InvalidServerAddress { address: String },
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Socket { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidServerAddress { .. } => ErrorSeverity::Critical,
            Self::ShuttingDown => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }
}
