//! 会话目录服务配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_endpoint() -> String {
    "https://sessiondirectory.xboxlive.com".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_session_expiry() -> u64 {
    120
}

fn default_max_heartbeat_failures() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

/// 会话目录服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// 目录服务根地址
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// 心跳间隔（秒），必须严格小于 `session_expiry_secs`
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// 服务端的会话过期窗口（秒）
    #[serde(default = "default_session_expiry")]
    pub session_expiry_secs: u64,

    /// 连续心跳失败多少次后认为会话丢失并重新发布
    #[serde(default = "default_max_heartbeat_failures")]
    pub max_heartbeat_failures: u32,

    /// publish / withdraw 的瞬时错误重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            session_expiry_secs: default_session_expiry(),
            max_heartbeat_failures: default_max_heartbeat_failures(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DirectoryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            errors.push("directory.endpoint must start with http:// or https://".to_string());
        }
        if self.heartbeat_interval_secs == 0 {
            errors.push("directory.heartbeat_interval_secs must be at least 1".to_string());
        }
        if self.heartbeat_interval_secs >= self.session_expiry_secs {
            errors.push(format!(
                "directory.heartbeat_interval_secs ({}) must be less than session_expiry_secs ({})",
                self.heartbeat_interval_secs, self.session_expiry_secs
            ));
        }
        if self.max_heartbeat_failures == 0 {
            errors.push("directory.max_heartbeat_failures must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_must_be_shorter_than_expiry() {
        let config = DirectoryConfig {
            heartbeat_interval_secs: 120,
            session_expiry_secs: 120,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("heartbeat_interval_secs"));

        assert!(DirectoryConfig::default().validate().is_ok());
    }
}
