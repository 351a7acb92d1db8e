//! 统一错误处理模型
//!
//! 提供 sessioncast 的顶层错误类型，聚合各组件 crate 的错误

use thiserror::Error;

/// 主应用的统一错误枚举
#[derive(Debug, Error)]
pub enum Error {
    // ========== 配置相关错误 ==========
    #[error("Configuration error: {0}")]
    Config(#[from] sessioncast_common::ConfigError),

    // ========== 组件错误 ==========
    #[error("Authentication error: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("Session directory error: {0}")]
    Directory(#[from] directory::DirectoryError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] signaling::SignalingError),

    #[error("Relay error: {0}")]
    Relay(#[from] relay::RelayError),

    // ========== 系统级错误 ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== 业务逻辑错误 ==========
    #[error("Bridge startup failed: {message}")]
    ServiceStartup { message: String },

    /// 配置验证失败
    #[error("Configuration validation failed: {message}")]
    ServiceValidation { message: String },

    // ========== 通用错误 ==========
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("Application error: {message}")]
    Custom { message: String },
}

/// 主应用的 Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom {
            message: message.into(),
        }
    }

    pub fn service_startup<S: Into<String>>(message: S) -> Self {
        Error::ServiceStartup {
            message: message.into(),
        }
    }

    pub fn service_validation<S: Into<String>>(message: S) -> Self {
        Error::ServiceValidation {
            message: message.into(),
        }
    }
}
