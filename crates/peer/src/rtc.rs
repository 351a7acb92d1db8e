//! 基于 `webrtc` crate 的传输实现
//!
//! - 作为 offer 方：创建一条有序可靠的 data channel，然后生成 offer
//! - 作为 answer 方：远端打开的所有 data channel 合并为一个入站流，出站优先走有序可靠的通道；
//!   只有不可靠通道打开时，等待 [`RELIABLE_GRACE`] 后退而使用它
//!
//! 本地 candidate 通过 `on_ice_candidate` 逐条产出，附加 `ufrag` / `network-id` 扩展字段后交给信令。
//! 本地描述生成之前收集到的 candidate 先缓存，拿到 ufrag 后按原顺序补发。

use crate::error::{ChannelError, NegotiationError};
use crate::transport::{DataChannel, PeerTransport, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use sessioncast_common::config::PeerConfig;
use signaling::IceServer;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// offer 方创建的数据通道名
pub const RELIABLE_CHANNEL_LABEL: &str = "ReliableDataChannel";

/// 只有不可靠通道打开时，等待可靠通道的时间
pub const RELIABLE_GRACE: Duration = Duration::from_secs(2);

const INBOUND_CAPACITY: usize = 1024;

type OpenedSlot = Arc<watch::Sender<OpenedChannels<Arc<RTCDataChannel>>>>;
type Outbox = Arc<std::sync::Mutex<CandidateOutbox>>;

fn transport_err(context: &str) -> impl FnOnce(webrtc::Error) -> NegotiationError + '_ {
    move |e| NegotiationError::transport(format!("{context}: {e}"))
}

/// 为每个 peer 创建 [`WebRtcTransport`]
pub struct WebRtcTransportFactory {
    api: API,
    stun_servers: Vec<IceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            api: APIBuilder::new().build(),
            stun_servers: config
                .stun_servers
                .iter()
                .map(|url| IceServer::stun(url.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let servers = self
            .stun_servers
            .iter()
            .chain(ice_servers)
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        let transport = WebRtcTransport::new(&self.api, servers).await?;
        Ok(Arc::new(transport))
    }
}

/// 单个 peer 的 RTCPeerConnection 封装
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    outbox: Outbox,
    local_candidates: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: std::sync::Mutex<Option<mpsc::Receiver<Bytes>>>,
    opened: OpenedSlot,
    offered: std::sync::Mutex<Option<Arc<RTCDataChannel>>>,
    closed: CancellationToken,
}

impl WebRtcTransport {
    pub async fn new(api: &API, ice_servers: Vec<RTCIceServer>) -> Result<Self, NegotiationError> {
        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(transport_err("create peer connection"))?;
        let pc = Arc::new(pc);

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let opened: OpenedSlot = Arc::new(watch::channel(OpenedChannels::default()).0);
        let outbox: Outbox = Arc::new(std::sync::Mutex::new(CandidateOutbox::new(candidate_tx)));
        let closed = CancellationToken::new();

        {
            let outbox = outbox.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let outbox = outbox.clone();
                Box::pin(async move {
                    // None 表示收集完成
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            if let Ok(mut outbox) = outbox.lock() {
                                outbox.push(init.candidate);
                            }
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));
        }

        {
            let closed = closed.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let closed = closed.clone();
                Box::pin(async move {
                    debug!("Peer connection state: {}", state);
                    if matches!(
                        state,
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                    ) {
                        closed.cancel();
                    }
                })
            }));
        }

        {
            let inbound_tx = inbound_tx.clone();
            let opened = opened.clone();
            let closed = closed.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                debug!(
                    "Remote opened data channel '{}' (ordered: {})",
                    dc.label(),
                    dc.ordered()
                );
                attach_channel(&dc, inbound_tx.clone(), opened.clone(), closed.clone());
                Box::pin(async {})
            }));
        }

        Ok(Self {
            pc,
            outbox,
            local_candidates: std::sync::Mutex::new(Some(candidate_rx)),
            inbound_tx,
            inbound_rx: std::sync::Mutex::new(Some(inbound_rx)),
            opened,
            offered: std::sync::Mutex::new(None),
            closed,
        })
    }

    async fn local_sdp(&self) -> Result<String, NegotiationError> {
        let description = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::transport("local description missing"))?;
        if let Some(ufrag) = ice_ufrag(&description.sdp)
            && let Ok(mut outbox) = self.outbox.lock()
        {
            outbox.set_ufrag(ufrag);
        }
        Ok(description.sdp)
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String, NegotiationError> {
        let dc = self
            .pc
            .create_data_channel(
                RELIABLE_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(transport_err("create data channel"))?;
        attach_channel(
            &dc,
            self.inbound_tx.clone(),
            self.opened.clone(),
            self.closed.clone(),
        );
        if let Ok(mut offered) = self.offered.lock() {
            *offered = Some(dc);
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(transport_err("create offer"))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(transport_err("set local description"))?;
        self.local_sdp().await
    }

    async fn create_answer(&self, offer: &str) -> Result<String, NegotiationError> {
        let offer = RTCSessionDescription::offer(offer.to_string())
            .map_err(transport_err("parse remote offer"))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(transport_err("set remote description"))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(transport_err("create answer"))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(transport_err("set local description"))?;
        self.local_sdp().await
    }

    async fn apply_answer(&self, answer: &str) -> Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(answer.to_string())
            .map_err(transport_err("parse remote answer"))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(transport_err("set remote description"))
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: strip_candidate_extensions(candidate),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                ..Default::default()
            })
            .await
            .map_err(transport_err("add ice candidate"))
    }

    fn local_candidates(&self) -> mpsc::UnboundedReceiver<String> {
        self.local_candidates
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    async fn open_data_channel(&self) -> Result<Arc<dyn DataChannel>, NegotiationError> {
        let inbound = self
            .inbound_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| NegotiationError::transport("data channel already taken"))?;

        let dc = tokio::select! {
            dc = pick_channel(self.opened.subscribe(), RELIABLE_GRACE) => dc.ok_or_else(|| {
                NegotiationError::transport("peer connection dropped before the data channel opened")
            })?,
            _ = self.closed.cancelled() => return Err(NegotiationError::transport("peer connection failed")),
        };
        debug!("Sending on data channel '{}'", dc.label());

        Ok(Arc::new(WebRtcDataChannel {
            pc: self.pc.clone(),
            dc,
            inbound: Mutex::new(inbound),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.pc.close().await {
            debug!("Error closing peer connection: {}", e);
        }
    }
}

/// 为通道挂上消息、打开和关闭回调
fn attach_channel(
    dc: &Arc<RTCDataChannel>,
    inbound: mpsc::Sender<Bytes>,
    opened: OpenedSlot,
    closed: CancellationToken,
) {
    dc.on_message(Box::new(move |message: DataChannelMessage| {
        let inbound = inbound.clone();
        Box::pin(async move {
            let _ = inbound.send(message.data).await;
        })
    }));

    let weak: Weak<RTCDataChannel> = Arc::downgrade(dc);
    dc.on_open(Box::new(move || {
        let weak = weak.clone();
        let opened = opened.clone();
        Box::pin(async move {
            if let Some(dc) = weak.upgrade() {
                let reliable = is_reliable(dc.label(), dc.ordered());
                opened.send_modify(|channels| channels.record(dc, reliable));
            }
        })
    }));

    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        let closed = closed.clone();
        let label = label.clone();
        Box::pin(async move {
            debug!("Data channel '{}' closed", label);
            closed.cancel();
        })
    }));
}

/// 可靠通道：offer 方使用的标签，或远端声明为有序
pub fn is_reliable(label: &str, ordered: bool) -> bool {
    label == RELIABLE_CHANNEL_LABEL || ordered
}

/// 已打开的通道，各保留第一条
#[derive(Debug, Clone)]
pub struct OpenedChannels<C> {
    reliable: Option<C>,
    unreliable: Option<C>,
}

impl<C> Default for OpenedChannels<C> {
    fn default() -> Self {
        Self {
            reliable: None,
            unreliable: None,
        }
    }
}

impl<C> OpenedChannels<C> {
    pub fn record(&mut self, channel: C, reliable: bool) {
        let slot = if reliable {
            &mut self.reliable
        } else {
            &mut self.unreliable
        };
        if slot.is_none() {
            *slot = Some(channel);
        }
    }

    fn any_open(&self) -> bool {
        self.reliable.is_some() || self.unreliable.is_some()
    }
}

/// 选出发送用的通道
///
/// 可靠通道一打开立即返回；先打开的是不可靠通道时再等 `grace`，仍没有可靠通道才用它。
/// 发送端在任何通道打开前被丢弃时返回 `None`。
pub async fn pick_channel<C: Clone>(
    mut opened: watch::Receiver<OpenedChannels<C>>,
    grace: Duration,
) -> Option<C> {
    let first = opened.wait_for(|c| c.any_open()).await.ok()?.clone();
    if let Some(reliable) = first.reliable {
        return Some(reliable);
    }

    match tokio::time::timeout(grace, opened.wait_for(|c| c.reliable.is_some())).await {
        Ok(Ok(channels)) => channels.reliable.clone(),
        _ => first.unreliable,
    }
}

/// 本地 candidate 出口
///
/// ufrag 未知时缓存，[`CandidateOutbox::set_ufrag`] 时按收集顺序补发；`network-id` 按发出顺序递增。
pub struct CandidateOutbox {
    tx: mpsc::UnboundedSender<String>,
    ufrag: Option<String>,
    pending: Vec<String>,
    next_index: u32,
}

impl CandidateOutbox {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            ufrag: None,
            pending: Vec::new(),
            next_index: 0,
        }
    }

    pub fn push(&mut self, candidate: String) {
        if self.ufrag.is_some() {
            self.emit(&candidate);
        } else {
            self.pending.push(candidate);
        }
    }

    pub fn set_ufrag(&mut self, ufrag: String) {
        if self.ufrag.is_some() {
            return;
        }
        self.ufrag = Some(ufrag);
        for candidate in std::mem::take(&mut self.pending) {
            self.emit(&candidate);
        }
    }

    fn emit(&mut self, candidate: &str) {
        let line = format_local_candidate(candidate, self.ufrag.as_deref(), self.next_index);
        self.next_index += 1;
        let _ = self.tx.send(line);
    }
}

/// 已打开的 WebRTC data channel
pub struct WebRtcDataChannel {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Send {
                reason: e.to_string(),
            })
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            message = inbound.recv() => message,
            _ = self.closed.cancelled() => None,
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.dc.close().await {
            debug!("Error closing data channel: {}", e);
        }
        if let Err(e) = self.pc.close().await {
            debug!("Error closing peer connection: {}", e);
        }
    }
}

/// 从 SDP 中取出 `a=ice-ufrag`
pub fn ice_ufrag(sdp: &str) -> Option<String> {
    sdp.lines()
        .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
        .map(|ufrag| ufrag.trim().to_string())
}

/// 本地 candidate 的线上格式：`candidate:... generation 0 ufrag X network-id N network-cost 0`
pub fn format_local_candidate(candidate: &str, ufrag: Option<&str>, network_id: u32) -> String {
    let base = if candidate.starts_with("candidate:") {
        candidate.to_string()
    } else {
        format!("candidate:{candidate}")
    };
    match ufrag {
        Some(ufrag) => {
            format!("{base} generation 0 ufrag {ufrag} network-id {network_id} network-cost 0")
        }
        None => base,
    }
}

/// 去掉远端 candidate 中 ICE agent 不认识的扩展字段
///
/// 保留 `foundation component transport priority address port typ <type>` 以及
/// `raddr` / `rport` / `tcptype` 三组键值。
pub fn strip_candidate_extensions(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 8 {
        return line.trim().to_string();
    }

    let mut kept: Vec<&str> = tokens[..8].to_vec();
    for pair in tokens[8..].chunks(2) {
        if let [key, value] = pair
            && matches!(*key, "raddr" | "rport" | "tcptype")
        {
            kept.push(key);
            kept.push(value);
        }
    }
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_ufrag() {
        let sdp = "v=0\r\na=ice-ufrag:AbCd\r\na=ice-pwd:secret\r\n";
        assert_eq!(ice_ufrag(sdp).as_deref(), Some("AbCd"));
        assert_eq!(ice_ufrag("v=0\r\n"), None);
    }

    #[test]
    fn test_format_local_candidate() {
        let line = format_local_candidate(
            "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
            Some("AbCd"),
            0,
        );
        assert_eq!(
            line,
            "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host generation 0 ufrag AbCd network-id 0 network-cost 0"
        );

        assert_eq!(
            format_local_candidate("1 1 udp 1 10.0.0.2 1 typ host", None, 3),
            "candidate:1 1 udp 1 10.0.0.2 1 typ host"
        );
    }

    #[test]
    fn test_strip_candidate_extensions() {
        let remote = "candidate:2 1 udp 1686052607 203.0.113.7 61000 typ srflx raddr 192.168.1.4 rport 61000 generation 0 ufrag x9 network-id 1 network-cost 10";
        assert_eq!(
            strip_candidate_extensions(remote),
            "candidate:2 1 udp 1686052607 203.0.113.7 61000 typ srflx raddr 192.168.1.4 rport 61000"
        );
    }

    #[test]
    fn test_candidates_gathered_before_ufrag_are_held_back() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = CandidateOutbox::new(tx);

        outbox.push("candidate:1 1 udp 1 10.0.0.2 50000 typ host".to_string());
        outbox.push("candidate:2 1 udp 1 10.0.0.3 50001 typ host".to_string());
        assert!(rx.try_recv().is_err());

        outbox.set_ufrag("AbCd".to_string());
        outbox.push("candidate:3 1 udp 1 10.0.0.4 50002 typ host".to_string());

        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(lines.len(), 3);
        for (index, line) in lines.iter().enumerate() {
            assert!(line.starts_with(&format!("candidate:{}", index + 1)));
            assert!(line.ends_with(&format!(
                "ufrag AbCd network-id {index} network-cost 0"
            )));
        }
    }

    #[test]
    fn test_reliable_channel_detection() {
        assert!(is_reliable(RELIABLE_CHANNEL_LABEL, false));
        assert!(is_reliable("game", true));
        assert!(!is_reliable("UnreliableDataChannel", false));
    }

    #[tokio::test]
    async fn test_reliable_channel_preferred_when_opened_second() {
        let (opened, rx) = watch::channel(OpenedChannels::default());
        let pick = tokio::spawn(pick_channel(rx, Duration::from_secs(5)));

        opened.send_modify(|c| c.record("UnreliableDataChannel", false));
        tokio::task::yield_now().await;
        opened.send_modify(|c| c.record(RELIABLE_CHANNEL_LABEL, true));

        assert_eq!(pick.await.unwrap(), Some(RELIABLE_CHANNEL_LABEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreliable_channel_used_after_grace() {
        let (opened, rx) = watch::channel(OpenedChannels::default());
        opened.send_modify(|c| c.record("UnreliableDataChannel", false));

        assert_eq!(
            pick_channel(rx, RELIABLE_GRACE).await,
            Some("UnreliableDataChannel")
        );
    }

    #[tokio::test]
    async fn test_pick_channel_without_any_open() {
        let (opened, rx) = watch::channel(OpenedChannels::<&str>::default());
        drop(opened);
        assert_eq!(pick_channel(rx, RELIABLE_GRACE).await, None);
    }

    #[test]
    fn test_strip_leaves_short_lines_alone() {
        assert_eq!(strip_candidate_extensions(" candidate:1 1 udp "), "candidate:1 1 udp");
    }

    #[tokio::test]
    async fn test_local_candidates_taken_once() {
        let factory = WebRtcTransportFactory::new(&PeerConfig {
            stun_servers: Vec::new(),
            ..Default::default()
        });
        let transport = factory.create(&[]).await.unwrap();

        let _first = transport.local_candidates();
        let mut second = transport.local_candidates();
        assert!(second.recv().await.is_none());
        transport.close().await;
    }
}
