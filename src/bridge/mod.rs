//! 会话桥接编排器
//!
//! 串联各组件：认证 → 发布会话 → 打开信令 → 协商 peer → 建立中继路由。
//! 单个编排循环独占会话记录，依次处理心跳、信令事件、peer 事件和路由事件。
//!
//! # 停止顺序
//! 1. 取消进行中的协商
//! 2. 关闭中继路由（宽限期后强制拆除）并关闭已建立的连接
//! 3. 撤回会话记录
//! 4. 关闭信令通道

pub mod advertisement;
pub mod link;
pub mod state;

pub use advertisement::{Advertisement, HeartbeatOutcome};
pub use link::{SignalingLink, open_signaling};
pub use state::{BridgeExit, BridgeState};

use crate::error::Result;
use auth::{CredentialManager, XboxLiveProvider};
use directory::{DirectoryClient, DirectoryError, SessionDescriptor, SessionDirectory};
use peer::{PeerConnectionManager, PeerEvent, TransportFactory, WebRtcTransportFactory};
use relay::{RelayEngine, RouteEvent};
use sessioncast_common::config::BridgeConfig;
use sessioncast_common::{NetworkId, metrics};
use signaling::{SignalEvent, SignalSink};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 编排器依赖的组件
///
/// 生产环境由 [`SessionBridge::connect`] 组装；测试可以替换任一接缝。
pub struct BridgeComponents {
    pub credentials: Arc<CredentialManager>,
    pub directory: Arc<dyn SessionDirectory>,
    pub signaling: Arc<dyn SignalingLink>,
    pub transports: Arc<dyn TransportFactory>,
    pub network_id: NetworkId,
}

/// 会话桥接
pub struct SessionBridge {
    config: BridgeConfig,
    components: BridgeComponents,
    state: watch::Sender<BridgeState>,
}

/// Advertising 阶段持有的组件
struct Running {
    advertisement: Advertisement,
    peers: PeerConnectionManager,
    relay: RelayEngine,
}

/// 编排循环消费的事件源
struct Inbound {
    signals: ReceiverStream<SignalEvent>,
    peers: mpsc::Receiver<PeerEvent>,
    routes: mpsc::UnboundedReceiver<RouteEvent>,
}

impl SessionBridge {
    pub fn new(config: BridgeConfig, components: BridgeComponents) -> Self {
        let (state, _) = watch::channel(BridgeState::Starting);
        Self {
            config,
            components,
            state,
        }
    }

    /// 按配置组装生产组件并打开信令通道
    pub async fn connect(config: BridgeConfig) -> Result<Self> {
        let provider = Arc::new(XboxLiveProvider::new(&config.auth)?);
        let credentials = Arc::new(CredentialManager::from_config(
            provider,
            config.auth.clone(),
        )?);
        let directory = DirectoryClient::new(
            &config.directory,
            &config.session,
            credentials.clone(),
        )?;

        let network_id = NetworkId::random();
        let signaling =
            open_signaling(&config.signaling, network_id, credentials.clone()).await?;
        let transports = WebRtcTransportFactory::new(&config.peer);

        let components = BridgeComponents {
            credentials,
            directory: Arc::new(directory),
            signaling: Arc::new(signaling),
            transports: Arc::new(transports),
            network_id,
        };
        Ok(Self::new(config, components))
    }

    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub fn network_id(&self) -> NetworkId {
        self.components.network_id
    }

    /// 运行直到 `shutdown` 被取消或发生致命错误
    pub async fn run(self, shutdown: CancellationToken) -> BridgeExit {
        let tasks = CancellationToken::new();
        let exit = match self.start(&tasks).await {
            Ok((mut running, inbound)) => {
                self.set_state(BridgeState::Advertising);
                let exit = self.advertise(&mut running, &shutdown, inbound).await;
                self.stop(running).await;
                exit
            }
            Err(reason) => {
                error!("Bridge failed to start: {}", reason);
                self.set_state(BridgeState::Stopping);
                self.components.signaling.close().await;
                BridgeExit::Failed(reason)
            }
        };

        tasks.cancel();
        info!("Bridge {}; {}", exit, metrics::summary());
        self.set_state(BridgeState::Stopped);
        exit
    }

    fn set_state(&self, state: BridgeState) {
        debug!("Bridge state -> {}", state);
        self.state.send_replace(state);
    }

    async fn start(
        &self,
        tasks: &CancellationToken,
    ) -> std::result::Result<(Running, Inbound), String> {
        let token = self
            .components
            .credentials
            .current_token()
            .await
            .map_err(|e| format!("authentication failed: {e}"))?;
        info!(
            "Authenticated as xuid {}",
            token.xuid.as_deref().unwrap_or("unknown")
        );

        let signal_events = self
            .components
            .signaling
            .events()
            .map_err(|e| e.to_string())?;
        let (relay, route_events) =
            RelayEngine::new(self.config.relay.clone(), tasks).map_err(|e| e.to_string())?;

        let descriptor = SessionDescriptor::from_config(&self.config.session, self.network_id());
        let advertisement = Advertisement::publish(
            self.components.directory.clone(),
            descriptor,
            &self.config.directory,
        )
        .await
        .map_err(|e| format!("failed to publish session: {e}"))?;

        let signals: Arc<dyn SignalSink> = self.components.signaling.clone();
        let (peers, peer_events) = PeerConnectionManager::new(
            self.components.transports.clone(),
            signals,
            self.config.peer.clone(),
            tasks,
        );

        info!(
            "Advertising session {} as network id {}, relaying to {}",
            advertisement.session_name(),
            self.network_id(),
            relay.server_addr()
        );
        Ok((
            Running {
                advertisement,
                peers,
                relay,
            },
            Inbound {
                signals: signal_events,
                peers: peer_events,
                routes: route_events,
            },
        ))
    }

    async fn advertise(
        &self,
        running: &mut Running,
        shutdown: &CancellationToken,
        mut inbound: Inbound,
    ) -> BridgeExit {
        let period = self.config.directory.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Stop requested");
                    return BridgeExit::Stopped;
                }
                _ = ticker.tick() => running.heartbeat().await,
                event = inbound.signals.next() => match event {
                    Some(event) => running.on_signal(event).await,
                    None if shutdown.is_cancelled() => {
                        info!("Stop requested");
                        return BridgeExit::Stopped;
                    }
                    None => return BridgeExit::Failed("signaling event stream ended".to_string()),
                },
                Some(event) = inbound.peers.recv() => running.on_peer(event).await,
                Some(event) = inbound.routes.recv() => running.on_route(event).await,
            };

            if let Err(e) = outcome {
                error!("Fatal session error: {}", e);
                return BridgeExit::Failed(e.to_string());
            }
        }
    }

    async fn stop(&self, running: Running) {
        self.set_state(BridgeState::Stopping);

        running.peers.abort_negotiations().await;
        running.peers.shutdown().await;

        running
            .relay
            .close_all(self.config.bridge.shutdown_grace())
            .await;
        for conn in running.peers.connections().await {
            conn.close().await;
        }

        match running.advertisement.withdraw().await {
            Ok(()) => info!("Session {} withdrawn", running.advertisement.session_name()),
            Err(e) => warn!(
                "Failed to withdraw session {}: {}",
                running.advertisement.session_name(),
                e
            ),
        }

        self.components.signaling.close().await;
    }
}

impl Running {
    async fn heartbeat(&mut self) -> std::result::Result<(), DirectoryError> {
        match self.advertisement.heartbeat().await? {
            HeartbeatOutcome::Healthy => debug!("Heartbeat ok"),
            HeartbeatOutcome::Degraded { failures } => {
                debug!("Heartbeat degraded ({} consecutive failures)", failures)
            }
            HeartbeatOutcome::Republished { .. } => {}
        }
        Ok(())
    }

    async fn on_signal(&mut self, event: SignalEvent) -> std::result::Result<(), DirectoryError> {
        match event {
            SignalEvent::JoinRequest {
                peer,
                connection_id,
                offer,
            } => {
                self.peers.handle_join(peer, connection_id, offer).await;
            }
            SignalEvent::Answer {
                peer,
                connection_id,
                sdp,
            } => self.peers.handle_answer(peer, connection_id, sdp).await,
            SignalEvent::Candidate {
                peer,
                connection_id,
                candidate,
            } => {
                self.peers
                    .handle_candidate(peer, connection_id, candidate)
                    .await
            }
            SignalEvent::PeerDeparted {
                peer,
                connection_id,
                code,
            } => {
                if let Some(conn) = self.peers.handle_departure(peer, connection_id, code).await {
                    self.relay.detach(peer).await;
                    conn.close().await;
                    if self.advertisement.remove_member(peer) {
                        return self.heartbeat().await;
                    }
                }
            }
            SignalEvent::IceServers(servers) => self.peers.set_ice_servers(servers).await,
            SignalEvent::Disconnected => {
                warn!("Signaling disconnected, aborting in-flight negotiations");
                self.peers.abort_negotiations().await;
            }
            SignalEvent::Reconnected => {
                info!("Signaling reconnected, refreshing session");
                return self.heartbeat().await;
            }
        }
        Ok(())
    }

    async fn on_peer(&mut self, event: PeerEvent) -> std::result::Result<(), DirectoryError> {
        match event {
            PeerEvent::Established(conn) => {
                let peer = conn.peer;
                if let Err(e) = self.relay.attach(peer, conn.channel.clone()).await {
                    if e.severity().is_fatal() {
                        error!("Failed to relay {}: {}", peer, e);
                    } else {
                        warn!("Failed to relay {}: {}", peer, e);
                    }
                    self.peers.remove_connection(peer).await;
                    conn.close().await;
                    return Ok(());
                }
                if self.advertisement.add_member(peer) {
                    info!(
                        "{} joined ({} members)",
                        peer,
                        self.advertisement.descriptor().member_count()
                    );
                    return self.heartbeat().await;
                }
            }
            PeerEvent::Failed {
                peer,
                connection_id,
                reason,
            } => debug!("Negotiation {} with {} failed: {}", connection_id, peer, reason),
        }
        Ok(())
    }

    async fn on_route(&mut self, event: RouteEvent) -> std::result::Result<(), DirectoryError> {
        match event {
            RouteEvent::Closed { peer, reason, .. } => {
                if let Some(conn) = self.peers.remove_connection(peer).await {
                    conn.close().await;
                }
                if self.advertisement.remove_member(peer) {
                    info!(
                        "{} left ({}), {} members",
                        peer,
                        reason,
                        self.advertisement.descriptor().member_count()
                    );
                    return self.heartbeat().await;
                }
            }
        }
        Ok(())
    }
}
