//! 会话广告配置
//!
//! 决定会话目录中显示的主机名、世界名与版本信息

use serde::{Deserialize, Serialize};

fn default_host_name() -> String {
    "Sessioncast".to_string()
}

fn default_world_name() -> String {
    "Bedrock world".to_string()
}

fn default_version() -> String {
    "1.21.0".to_string()
}

fn default_protocol() -> u32 {
    685
}

fn default_max_players() -> u32 {
    10
}

fn default_service_config_id() -> String {
    "4fc10100-5f7a-4470-899b-280835760c07".to_string()
}

fn default_template_name() -> String {
    "MinecraftLobby".to_string()
}

/// 会话广告元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 主机名（显示在好友列表中）
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// 世界名
    #[serde(default = "default_world_name")]
    pub world_name: String,

    /// 游戏版本
    #[serde(default = "default_version")]
    pub version: String,

    /// 网络协议号
    #[serde(default = "default_protocol")]
    pub protocol: u32,

    /// 最大玩家数
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Xbox Live service config id (SCID)
    #[serde(default = "default_service_config_id")]
    pub service_config_id: String,

    /// 会话模板名称
    #[serde(default = "default_template_name")]
    pub template_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            world_name: default_world_name(),
            version: default_version(),
            protocol: default_protocol(),
            max_players: default_max_players(),
            service_config_id: default_service_config_id(),
            template_name: default_template_name(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.host_name.trim().is_empty() {
            errors.push("session.host_name cannot be empty".to_string());
        }
        if self.max_players == 0 {
            errors.push("session.max_players must be at least 1".to_string());
        }
        if self.service_config_id.trim().is_empty() {
            errors.push("session.service_config_id cannot be empty".to_string());
        }
        if self.template_name.trim().is_empty() {
            errors.push("session.template_name cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
