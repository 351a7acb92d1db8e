//! sessioncast 通用基础设施库
//!
//! 为会话桥接的各个组件提供共享的基础设施：配置、错误分类、标识符类型、
//! 重试退避策略以及 Prometheus 指标

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod util;

// Re-export commonly used types for convenience
pub use config::BridgeConfig;
pub use error::{ConfigError, ErrorSeverity};
pub use types::{ConnectionId, NetworkId, PeerId};
pub use util::Backoff;
