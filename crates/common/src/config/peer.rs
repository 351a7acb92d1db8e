//! Peer 协商配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_negotiation_timeout() -> u64 {
    30
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

/// Peer 协商配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// 单个 peer 协商的超时（秒），覆盖从 join 到 data channel 打开的全过程
    #[serde(default = "default_negotiation_timeout")]
    pub negotiation_timeout_secs: u64,

    /// 信令服务未下发 TURN 凭据时使用的 STUN 服务器
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_secs: default_negotiation_timeout(),
            stun_servers: default_stun_servers(),
        }
    }
}

impl PeerConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.negotiation_timeout_secs == 0 {
            return Err("peer.negotiation_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}
