//! 信令通道配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_endpoint() -> String {
    "wss://signal.franchise.minecraft-services.net/ws/v1.0/signaling".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_ping_interval() -> u64 {
    30
}

/// 信令 WebSocket 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket 端点（不含 network id 路径段）
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// 重连初始退避（毫秒）
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// 重连最大退避（毫秒）
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// 保活帧间隔（秒）
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl SignalingConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| format!("Invalid signaling.endpoint '{}': {e}", self.endpoint))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err("signaling.endpoint must start with ws:// or wss://".to_string());
        }
        Ok(())
    }
}
