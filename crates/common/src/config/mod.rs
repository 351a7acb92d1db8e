//! 统一配置管理系统
//!
//! 本模块是 sessioncast 配置的"单一真理之源"。
//! 所有配置项的定义、文档、默认值都在这里统一管理。

pub mod auth;
pub mod directory;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;

pub use crate::config::auth::AuthConfig;
pub use crate::config::directory::DirectoryConfig;
pub use crate::config::peer::PeerConfig;
pub use crate::config::relay::RelayConfig;
pub use crate::config::session::SessionConfig;
pub use crate::config::signaling::SignalingConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 会话桥接的主配置结构体
///
/// 配置文件使用 TOML 格式，所有字段都有默认值，
/// 最小可用配置只需 `name` 和 `env`。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    /// 实例名称
    ///
    /// 出现在日志中，用于区分同一台机器上的多个桥接实例。
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境
    /// - "prod": 生产环境，建议文件日志并开启轮转
    /// - "test": 测试环境，用于自动化测试
    pub env: String,

    /// 身份认证
    #[serde(default)]
    pub auth: AuthConfig,

    /// 会话广告元数据
    #[serde(default)]
    pub session: SessionConfig,

    /// 会话目录服务
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// 信令通道
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Peer 协商
    #[serde(default)]
    pub peer: PeerConfig,

    /// UDP 中继
    #[serde(default)]
    pub relay: RelayConfig,

    /// 编排器生命周期
    #[serde(default)]
    pub bridge: BridgeSection,

    /// 可观测性配置（日志）
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 编排器生命周期配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeSection {
    /// 停止时等待已建立连接优雅关闭的时间（秒），超时后强制拆除
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl BridgeSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,webrtc=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 日志轮转开关
    ///
    /// 当 output = "file" 时有效：
    /// - true: 按天轮转日志文件
    /// - false: 追加到单个文件
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "sessioncast".to_string(),
            env: "dev".to_string(),
            auth: AuthConfig::default(),
            session: SessionConfig::default(),
            directory: DirectoryConfig::default(),
            signaling: SignalingConfig::default(),
            peer: PeerConfig::default(),
            relay: RelayConfig::default(),
            bridge: BridgeSection::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// 返回日志配置引用
    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    /// 检查是否使用控制台日志输出
    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    /// 检查是否应该轮转日志
    pub fn should_rotate_logs(&self) -> bool {
        self.observability.log.output == "file" && self.observability.log.rotate
    }

    /// 获取日志过滤级别，优先使用 RUST_LOG
    pub fn get_filter_level(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|v| {
                let trimmed = v.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            })
            .unwrap_or_else(|| self.observability.filter_level.clone())
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref).map_err(|e| ConfigError::ParseError {
            source: Box::new(e),
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
            source: Box::new(e),
        })
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// 验证配置有效性
    ///
    /// 返回所有发现的问题；以 "Warning:" 开头的条目不阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        // 验证过滤级别（EnvFilter 语法）
        {
            let main_level = self
                .observability
                .filter_level
                .split(',')
                .next()
                .unwrap_or("")
                .trim();
            if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
                errors.push(format!(
                    "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                    self.observability.filter_level
                ));
            }
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        for section in [
            self.auth.validate(),
            self.session.validate(),
            self.directory.validate(),
            self.relay.validate(),
        ] {
            if let Err(mut problems) = section {
                errors.append(&mut problems);
            }
        }

        if let Err(e) = self.signaling.validate() {
            errors.push(e);
        }
        if let Err(e) = self.peer.validate() {
            errors.push(e);
        }

        if self.env == "prod" && self.observability.log.output == "console" {
            errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 只保留致命问题；无致命问题时返回 Ok 并附带警告列表
    pub fn check(&self) -> Result<Vec<String>, ConfigError> {
        match self.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(problems) => {
                let (warnings, fatal): (Vec<_>, Vec<_>) =
                    problems.into_iter().partition(|p| p.starts_with("Warning:"));
                if fatal.is_empty() {
                    Ok(warnings)
                } else {
                    Err(ConfigError::Validation { problems: fatal })
                }
            }
        }
    }
}
