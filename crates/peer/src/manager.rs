//! Peer 连接管理器
//!
//! 每个 join 请求对应一个 candidate 和一个协商任务。candidate 表只在插入、删除和查找时短暂加锁，
//! 信令输入通过各自的 channel 交给协商任务。协商成功的连接以 [`PeerEvent::Established`] 交给中继。

use crate::error::NegotiationError;
use crate::state::{NegotiationEvent, NegotiationState};
use crate::transport::{DataChannel, PeerTransport, TransportFactory};
use chrono::{DateTime, Utc};
use sessioncast_common::ErrorSeverity;
use sessioncast_common::config::PeerConfig;
use sessioncast_common::metrics::{NEGOTIATION_FAILURES, PEERS_ESTABLISHED};
use sessioncast_common::{ConnectionId, PeerId};
use signaling::{IceServer, Signal, SignalSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// 已建立的 peer 连接
#[derive(Clone)]
pub struct PeerConnection {
    pub peer: PeerId,
    pub connection_id: ConnectionId,
    pub channel: Arc<dyn DataChannel>,
    pub established_at: DateTime<Utc>,
    transport: Arc<dyn PeerTransport>,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer", &self.peer)
            .field("connection_id", &self.connection_id)
            .field("established_at", &self.established_at)
            .finish()
    }
}

impl PeerConnection {
    /// 关闭 data channel 和底层传输
    pub async fn close(&self) {
        self.channel.close().await;
        self.transport.close().await;
    }
}

/// 管理器向编排器发出的事件
#[derive(Debug)]
pub enum PeerEvent {
    Established(PeerConnection),
    Failed {
        peer: PeerId,
        connection_id: ConnectionId,
        reason: String,
    },
}

/// 协商任务的输入
#[derive(Debug)]
enum PeerInput {
    Answer(String),
    Candidate(String),
    Departed(u32),
}

struct CandidateEntry {
    connection_id: ConnectionId,
    input: mpsc::UnboundedSender<PeerInput>,
    cancel: CancellationToken,
}

struct Shared {
    factory: Arc<dyn TransportFactory>,
    signals: Arc<dyn SignalSink>,
    config: PeerConfig,
    ice_servers: RwLock<Vec<IceServer>>,
    candidates: RwLock<HashMap<PeerId, CandidateEntry>>,
    connections: RwLock<HashMap<PeerId, PeerConnection>>,
    events: mpsc::Sender<PeerEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Peer 连接管理器
pub struct PeerConnectionManager {
    shared: Arc<Shared>,
}

impl PeerConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        signals: Arc<dyn SignalSink>,
        config: PeerConfig,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            factory,
            signals,
            config,
            ice_servers: RwLock::new(Vec::new()),
            candidates: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            events: events_tx,
            cancel: parent.child_token(),
            tasks: TaskTracker::new(),
        });
        (Self { shared }, events_rx)
    }

    /// 替换信令服务下发的 ICE 服务器，只影响之后的协商
    pub async fn set_ice_servers(&self, servers: Vec<IceServer>) {
        debug!("Using {} signaled ICE servers", servers.len());
        *self.shared.ice_servers.write().await = servers;
    }

    /// 处理 join 请求；已在协商或已建立的 peer 会被忽略
    pub async fn handle_join(
        &self,
        peer: PeerId,
        connection_id: ConnectionId,
        offer: Option<String>,
    ) -> bool {
        if self.shared.cancel.is_cancelled() {
            debug!("Ignoring join from {} during shutdown", peer);
            return false;
        }
        if self.shared.connections.read().await.contains_key(&peer) {
            debug!("Ignoring duplicate join from established peer {}", peer);
            return false;
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let cancel = self.shared.cancel.child_token();
        {
            let mut candidates = self.shared.candidates.write().await;
            if candidates.contains_key(&peer) {
                debug!("Ignoring duplicate join from negotiating peer {}", peer);
                return false;
            }
            candidates.insert(
                peer,
                CandidateEntry {
                    connection_id,
                    input: input_tx,
                    cancel: cancel.clone(),
                },
            );
        }

        info!(
            "Join request from {} (connection {}, {})",
            peer,
            connection_id,
            if offer.is_some() { "answering" } else { "offering" }
        );
        let shared = self.shared.clone();
        self.shared.tasks.spawn(async move {
            shared
                .negotiate(peer, connection_id, offer, input_rx, cancel)
                .await;
        });
        true
    }

    pub async fn handle_answer(&self, peer: PeerId, connection_id: ConnectionId, sdp: String) {
        self.route(peer, connection_id, PeerInput::Answer(sdp)).await;
    }

    pub async fn handle_candidate(
        &self,
        peer: PeerId,
        connection_id: ConnectionId,
        candidate: String,
    ) {
        self.route(peer, connection_id, PeerInput::Candidate(candidate))
            .await;
    }

    /// 远端报告失败或离开
    ///
    /// 协商中的 candidate 会失败；已建立的连接从连接表移除并返回，由调用方拆除中继路由。
    pub async fn handle_departure(
        &self,
        peer: PeerId,
        connection_id: ConnectionId,
        code: u32,
    ) -> Option<PeerConnection> {
        if self.route(peer, connection_id, PeerInput::Departed(code)).await {
            return None;
        }

        let mut connections = self.shared.connections.write().await;
        match connections.get(&peer) {
            Some(conn) if conn.connection_id == connection_id => {
                info!("Peer {} left (code {})", peer, code);
                connections.remove(&peer)
            }
            _ => None,
        }
    }

    /// 把输入交给匹配的协商任务，返回是否找到
    async fn route(&self, peer: PeerId, connection_id: ConnectionId, input: PeerInput) -> bool {
        let candidates = self.shared.candidates.read().await;
        match candidates.get(&peer) {
            Some(entry) if entry.connection_id == connection_id => {
                let _ = entry.input.send(input);
                true
            }
            Some(entry) => {
                debug!(
                    "Dropping signal for stale connection {} of {} (current {})",
                    connection_id, peer, entry.connection_id
                );
                false
            }
            None => {
                debug!("Dropping signal for unknown peer {}", peer);
                false
            }
        }
    }

    /// 已建立连接的快照
    pub async fn connections(&self) -> Vec<PeerConnection> {
        self.shared.connections.read().await.values().cloned().collect()
    }

    pub async fn connection(&self, peer: PeerId) -> Option<PeerConnection> {
        self.shared.connections.read().await.get(&peer).cloned()
    }

    /// 通道关闭或 peer 超时后移除连接
    pub async fn remove_connection(&self, peer: PeerId) -> Option<PeerConnection> {
        let removed = self.shared.connections.write().await.remove(&peer);
        if removed.is_some() {
            debug!("Removed connection for {}", peer);
        }
        removed
    }

    pub async fn negotiating_count(&self) -> usize {
        self.shared.candidates.read().await.len()
    }

    /// 取消所有进行中的协商，不会恢复
    pub async fn abort_negotiations(&self) {
        let candidates = self.shared.candidates.read().await;
        if !candidates.is_empty() {
            info!("Aborting {} in-flight negotiations", candidates.len());
        }
        for entry in candidates.values() {
            entry.cancel.cancel();
        }
    }

    /// 取消全部协商并等待协商任务退出；已建立的连接交由中继关闭
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        debug!("Peer connection manager stopped");
    }
}

impl Shared {
    async fn negotiate(
        self: Arc<Self>,
        peer: PeerId,
        connection_id: ConnectionId,
        offer: Option<String>,
        input: mpsc::UnboundedReceiver<PeerInput>,
        cancel: CancellationToken,
    ) {
        let servers = self.ice_servers.read().await.clone();
        let timeout = self.config.negotiation_timeout();

        let result = match self.factory.create(&servers).await {
            Ok(transport) => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(NegotiationError::Aborted),
                    outcome = tokio::time::timeout(
                        timeout,
                        self.drive(peer, connection_id, offer, input, transport.as_ref()),
                    ) => outcome.unwrap_or(Err(NegotiationError::Timeout { secs: timeout.as_secs() })),
                };
                match outcome {
                    Ok(channel) => Ok((transport, channel)),
                    Err(e) => {
                        transport.close().await;
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };

        let event = match result {
            Ok((transport, channel)) => {
                let connection = PeerConnection {
                    peer,
                    connection_id,
                    channel,
                    established_at: Utc::now(),
                    transport,
                };
                self.connections
                    .write()
                    .await
                    .insert(peer, connection.clone());
                // 先登记连接再移出 candidate 表，重复的 join 在两张表之间不会漏检
                self.candidates.write().await.remove(&peer);
                PEERS_ESTABLISHED.inc();
                info!("Peer {} established (connection {})", peer, connection_id);
                PeerEvent::Established(connection)
            }
            Err(e) => {
                self.candidates.write().await.remove(&peer);
                NEGOTIATION_FAILURES
                    .with_label_values(&[e.metric_reason()])
                    .inc();
                match e.severity() {
                    ErrorSeverity::Info => info!("Negotiation with {} ended: {}", peer, e),
                    _ => warn!("Negotiation with {} failed: {}", peer, e),
                }
                if let Some(code) = e.connect_error_code() {
                    let signal = Signal::ConnectError {
                        connection_id,
                        code,
                    };
                    if let Err(send_err) = self.signals.send_signal(peer, signal).await {
                        debug!("Could not report failure to {}: {}", peer, send_err);
                    }
                }
                PeerEvent::Failed {
                    peer,
                    connection_id,
                    reason: e.to_string(),
                }
            }
        };

        if self.events.send(event).await.is_err() {
            debug!("Peer event receiver dropped");
        }
    }

    /// 驱动一次协商直到 data channel 打开
    async fn drive(
        &self,
        peer: PeerId,
        connection_id: ConnectionId,
        offer: Option<String>,
        mut input: mpsc::UnboundedReceiver<PeerInput>,
        transport: &dyn PeerTransport,
    ) -> Result<Arc<dyn DataChannel>, NegotiationError> {
        let mut local_candidates = transport.local_candidates();
        let mut local_open = true;
        let mut state = NegotiationState::AwaitingOffer;
        // 远端描述生效之前收到的 candidate
        let mut pending: Vec<String> = Vec::new();
        let mut remote_ready = false;

        match offer {
            Some(remote_offer) => {
                let answer = transport.create_answer(&remote_offer).await?;
                self.signals
                    .send_signal(
                        peer,
                        Signal::ConnectResponse {
                            connection_id,
                            answer,
                        },
                    )
                    .await?;
                state = state.advance(NegotiationEvent::AnswerSent)?;
                remote_ready = true;
            }
            None => {
                let local_offer = transport.create_offer().await?;
                self.signals
                    .send_signal(
                        peer,
                        Signal::ConnectRequest {
                            connection_id,
                            offer: Some(local_offer),
                        },
                    )
                    .await?;
                state = state.advance(NegotiationEvent::OfferSent)?;
            }
        }
        debug!("{}: {}", peer, state);

        let channel = transport.open_data_channel();
        tokio::pin!(channel);

        loop {
            tokio::select! {
                message = input.recv() => match message {
                    Some(PeerInput::Answer(sdp)) => {
                        state = state.advance(NegotiationEvent::AnswerReceived)?;
                        transport.apply_answer(&sdp).await?;
                        remote_ready = true;
                        for candidate in pending.drain(..) {
                            add_remote_candidate(transport, peer, &candidate).await;
                        }
                        state = state.advance(NegotiationEvent::IceStarted)?;
                        debug!("{}: {}", peer, state);
                    }
                    Some(PeerInput::Candidate(candidate)) => {
                        if remote_ready {
                            add_remote_candidate(transport, peer, &candidate).await;
                        } else {
                            pending.push(candidate);
                        }
                    }
                    Some(PeerInput::Departed(code)) => {
                        return Err(NegotiationError::RemoteFailure { code });
                    }
                    None => return Err(NegotiationError::Aborted),
                },
                candidate = local_candidates.recv(), if local_open => match candidate {
                    Some(candidate) => {
                        self.signals
                            .send_signal(peer, Signal::CandidateAdd { connection_id, candidate })
                            .await?;
                    }
                    None => local_open = false,
                },
                opened = &mut channel => {
                    let opened = opened?;
                    state = state.advance(NegotiationEvent::ChannelOpened)?;
                    debug!("{}: {}", peer, state);
                    return Ok(opened);
                }
            }
        }
    }
}

/// 单条 candidate 无效不影响协商，ICE 可能通过其他 candidate 成功
async fn add_remote_candidate(transport: &dyn PeerTransport, peer: PeerId, candidate: &str) {
    if let Err(e) = transport.add_ice_candidate(candidate).await {
        warn!("Ignoring candidate from {}: {}", peer, e);
    }
}
