//! 交给编排器的信令事件

use crate::error::SignalingError;
use crate::message::{FRAME_CREDENTIALS, FRAME_PING, FRAME_SIGNAL, Frame, IceCredentials, IceServer, Signal};
use sessioncast_common::{ConnectionId, PeerId};

/// 信令事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    /// 玩家请求加入；携带 offer 时本机作为应答方
    JoinRequest {
        peer: PeerId,
        connection_id: ConnectionId,
        offer: Option<String>,
    },
    /// 对本机 offer 的应答
    Answer {
        peer: PeerId,
        connection_id: ConnectionId,
        sdp: String,
    },
    /// 远端 ICE candidate
    Candidate {
        peer: PeerId,
        connection_id: ConnectionId,
        candidate: String,
    },
    /// 远端报告失败或离开
    PeerDeparted {
        peer: PeerId,
        connection_id: ConnectionId,
        code: u32,
    },
    /// 信令服务下发的 TURN 凭据
    IceServers(Vec<IceServer>),
    /// 断线后重连成功
    Reconnected,
    /// 连接断开，正在重连
    Disconnected,
}

impl SignalEvent {
    /// 把入站帧翻译为事件；保活帧与未知类型返回 `Ok(None)`
    pub fn from_frame(frame: Frame) -> Result<Option<Self>, SignalingError> {
        match frame.kind {
            FRAME_PING => Ok(None),
            FRAME_SIGNAL => {
                let from = frame
                    .from
                    .ok_or_else(|| SignalingError::malformed("signal frame without From"))?;
                let peer: PeerId = from
                    .parse()
                    .map_err(|e| SignalingError::malformed(format!("bad From '{from}': {e}")))?;
                let message = frame
                    .message
                    .ok_or_else(|| SignalingError::malformed("signal frame without Message"))?;
                Ok(Some(Self::from_signal(peer, Signal::parse(&message)?)))
            }
            FRAME_CREDENTIALS => {
                let message = frame
                    .message
                    .ok_or_else(|| SignalingError::malformed("credentials frame without Message"))?;
                let servers = IceCredentials::parse(&message)?.into_ice_servers();
                Ok(Some(Self::IceServers(servers)))
            }
            _ => Ok(None),
        }
    }

    fn from_signal(peer: PeerId, signal: Signal) -> Self {
        match signal {
            Signal::ConnectRequest {
                connection_id,
                offer,
            } => Self::JoinRequest {
                peer,
                connection_id,
                offer,
            },
            Signal::ConnectResponse {
                connection_id,
                answer,
            } => Self::Answer {
                peer,
                connection_id,
                sdp: answer,
            },
            Signal::CandidateAdd {
                connection_id,
                candidate,
            } => Self::Candidate {
                peer,
                connection_id,
                candidate,
            },
            Signal::ConnectError {
                connection_id,
                code,
            } => Self::PeerDeparted {
                peer,
                connection_id,
                code,
            },
        }
    }
}
