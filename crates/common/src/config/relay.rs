//! 中继配置

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

fn default_server_address() -> String {
    "127.0.0.1:19132".to_string()
}

fn default_queue_depth() -> usize {
    256
}

fn default_liveness_timeout() -> u64 {
    60
}

fn default_max_datagram_size() -> usize {
    65535
}

/// 中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// 本地游戏服务器 UDP 地址
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// 发往单个 peer 的队列深度，溢出时丢弃最旧的数据报
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// peer 方向无数据多久后关闭路由（秒）
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,

    /// 单个数据报的最大长度
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            queue_depth: default_queue_depth(),
            liveness_timeout_secs: default_liveness_timeout(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

impl RelayConfig {
    pub fn server_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.server_address.parse()
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server_addr().is_err() {
            errors.push(format!(
                "Invalid relay.server_address '{}', must be ip:port",
                self.server_address
            ));
        }
        if self.queue_depth == 0 {
            errors.push("relay.queue_depth must be at least 1".to_string());
        }
        if self.liveness_timeout_secs == 0 {
            errors.push("relay.liveness_timeout_secs must be at least 1".to_string());
        }
        if self.max_datagram_size < 576 {
            errors.push("relay.max_datagram_size must be at least 576".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
