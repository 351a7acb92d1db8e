//! 线上帧格式
//!
//! 每个 WebSocket 文本帧都是一个 JSON 对象：
//! - `{"Type":0}` 保活
//! - `{"Type":1,"To":<peer>,"Message":"<signal>"}` 发往 peer 的信令
//! - `{"Type":1,"From":"<peer>","Message":"<signal>"}` 来自 peer 的信令
//! - `{"Type":2,"Message":"<json>"}` ICE (TURN) 凭据

use crate::error::SignalingError;
use serde::{Deserialize, Deserializer, Serialize};
use sessioncast_common::ConnectionId;
use std::fmt;

pub const FRAME_PING: u8 = 0;
pub const FRAME_SIGNAL: u8 = 1;
pub const FRAME_CREDENTIALS: u8 = 2;

/// CONNECTERROR 错误码
pub mod error_code {
    pub const NONE: u32 = 0;
    pub const NEGOTIATION_TIMEOUT: u32 = 2;
    pub const FAILED_TO_CREATE_PEER_CONNECTION: u32 = 4;
    pub const ICE: u32 = 5;
    pub const FAILED_TO_CREATE_ANSWER: u32 = 11;
    pub const FAILED_TO_SET_REMOTE_DESCRIPTION: u32 = 13;
    pub const INCOMING_CONNECTION_IGNORED: u32 = 16;
    pub const SIGNALING_PARSING_FAILURE: u32 = 17;
}

/// WebSocket 帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frame {
    #[serde(rename = "Type")]
    pub kind: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Frame {
    pub fn ping() -> Self {
        Self {
            kind: FRAME_PING,
            to: None,
            from: None,
            message: None,
        }
    }

    pub fn signal(to: u64, signal: &Signal) -> Self {
        Self {
            kind: FRAME_SIGNAL,
            to: Some(to),
            from: None,
            message: Some(signal.to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::malformed(e.to_string()))
    }

    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::malformed(e.to_string()))
    }
}

/// 部分服务端实现以数字形式下发 From
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// 信令文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// `CONNECTREQUEST <cid> [<sdp offer>]`
    ConnectRequest {
        connection_id: ConnectionId,
        offer: Option<String>,
    },
    /// `CONNECTRESPONSE <cid> <sdp answer>`
    ConnectResponse {
        connection_id: ConnectionId,
        answer: String,
    },
    /// `CANDIDATEADD <cid> <candidate>`
    CandidateAdd {
        connection_id: ConnectionId,
        candidate: String,
    },
    /// `CONNECTERROR <cid> <code>`
    ConnectError {
        connection_id: ConnectionId,
        code: u32,
    },
}

impl Signal {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::ConnectRequest { connection_id, .. }
            | Self::ConnectResponse { connection_id, .. }
            | Self::CandidateAdd { connection_id, .. }
            | Self::ConnectError { connection_id, .. } => *connection_id,
        }
    }

    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let mut parts = text.trim_start().splitn(3, ' ');
        let kind = parts.next().unwrap_or_default();
        let connection_id: ConnectionId = parts
            .next()
            .ok_or_else(|| SignalingError::malformed(format!("{kind}: missing connection id")))?
            .trim()
            .parse()
            .map_err(|e| SignalingError::malformed(format!("{kind}: bad connection id: {e}")))?;
        // 只去掉分隔用的单个空格，SDP 末尾的 CRLF 原样保留
        let payload = parts.next().filter(|p| !p.trim().is_empty());

        let require = |field: &str| {
            payload
                .map(str::to_string)
                .ok_or_else(|| SignalingError::malformed(format!("{kind}: missing {field}")))
        };

        match kind {
            "CONNECTREQUEST" => Ok(Self::ConnectRequest {
                connection_id,
                offer: payload.map(str::to_string),
            }),
            "CONNECTRESPONSE" => Ok(Self::ConnectResponse {
                connection_id,
                answer: require("answer")?,
            }),
            "CANDIDATEADD" => Ok(Self::CandidateAdd {
                connection_id,
                candidate: require("candidate")?,
            }),
            "CONNECTERROR" => Ok(Self::ConnectError {
                connection_id,
                code: require("code")?
                    .trim()
                    .parse()
                    .map_err(|e| SignalingError::malformed(format!("CONNECTERROR: bad code: {e}")))?,
            }),
            other => Err(SignalingError::malformed(format!("unknown signal '{other}'"))),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectRequest {
                connection_id,
                offer: Some(offer),
            } => write!(f, "CONNECTREQUEST {connection_id} {offer}"),
            Self::ConnectRequest {
                connection_id,
                offer: None,
            } => write!(f, "CONNECTREQUEST {connection_id}"),
            Self::ConnectResponse {
                connection_id,
                answer,
            } => write!(f, "CONNECTRESPONSE {connection_id} {answer}"),
            Self::CandidateAdd {
                connection_id,
                candidate,
            } => write!(f, "CANDIDATEADD {connection_id} {candidate}"),
            Self::ConnectError {
                connection_id,
                code,
            } => write!(f, "CONNECTERROR {connection_id} {code}"),
        }
    }
}

/// ICE 服务器（STUN / TURN）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// `Type 2` 消息体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IceCredentials {
    #[serde(default)]
    pub expiration_in_seconds: u64,
    #[serde(default)]
    pub turn_auth_servers: Vec<TurnAuthServer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TurnAuthServer {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl IceCredentials {
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::malformed(e.to_string()))
    }

    pub fn into_ice_servers(self) -> Vec<IceServer> {
        self.turn_auth_servers
            .into_iter()
            .filter(|s| !s.urls.is_empty())
            .map(|s| IceServer {
                urls: s.urls,
                username: s.username,
                credential: s.password,
            })
            .collect()
    }
}
