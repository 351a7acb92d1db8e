//! 会话描述与会话句柄

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sessioncast_common::config::SessionConfig;
use sessioncast_common::{NetworkId, PeerId};

/// WebRTC 连接类型（SupportedConnections.ConnectionType）
const CONNECTION_TYPE_WEBRTC: u32 = 3;

/// 会话广告内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub host_name: String,
    pub world_name: String,
    pub version: String,
    pub protocol: u32,
    pub max_players: u32,
    /// 玩家向此 network id 发送 CONNECTREQUEST
    pub network_id: NetworkId,
    /// 已建立连接的 peer
    pub members: Vec<PeerId>,
}

impl SessionDescriptor {
    pub fn from_config(config: &SessionConfig, network_id: NetworkId) -> Self {
        Self {
            host_name: config.host_name.clone(),
            world_name: config.world_name.clone(),
            version: config.version.clone(),
            protocol: config.protocol,
            max_players: config.max_players,
            network_id,
            members: Vec::new(),
        }
    }

    /// 当前人数，主机自身计为一名成员
    pub fn member_count(&self) -> u32 {
        1 + self.members.len() as u32
    }

    pub fn add_member(&mut self, peer: PeerId) -> bool {
        if self.members.contains(&peer) {
            return false;
        }
        self.members.push(peer);
        true
    }

    pub fn remove_member(&mut self, peer: PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|p| *p != peer);
        before != self.members.len()
    }

    /// 序列化为目录服务的请求体
    pub fn to_body(&self) -> Value {
        let network_id = self.network_id.as_u64();
        json!({
            "properties": {
                "system": {
                    "joinRestriction": "followed",
                    "readRestriction": "followed",
                    "closed": false,
                },
                "custom": {
                    "hostName": self.host_name,
                    "worldName": self.world_name,
                    "version": self.version,
                    "protocol": self.protocol,
                    "MemberCount": self.member_count(),
                    "MaxMemberCount": self.max_players,
                    "Joinability": "joinable_by_friends",
                    "BroadcastSetting": 3,
                    "OnlineCrossPlatformGame": true,
                    "CrossPlayDisabled": false,
                    "TransportLayer": 2,
                    "WebRTCNetworkId": network_id,
                    "SupportedConnections": [{
                        "ConnectionType": CONNECTION_TYPE_WEBRTC,
                        "HostIpAddress": "",
                        "HostPort": 0,
                        "NetherNetId": network_id,
                        "WebRTCNetworkId": network_id,
                    }],
                    "members": self.members.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                },
            },
            "members": {
                "me": {
                    "constants": { "system": { "initialize": true } },
                    "properties": { "system": { "active": true } },
                },
            },
        })
    }
}

/// 已发布的会话记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// 会话名（大写 UUID）
    pub name: String,
    pub published_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            published_at: now,
            last_heartbeat: now,
        }
    }

    /// 距上一次成功心跳（或发布）的时间
    pub fn since_last_heartbeat(&self) -> std::time::Duration {
        (Utc::now() - self.last_heartbeat)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}
