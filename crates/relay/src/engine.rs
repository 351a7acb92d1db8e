//! 中继引擎
//!
//! 为每个已建立的 peer 绑定一个连接到 `relay.server_address` 的专用 UDP socket，
//! 游戏服务器因此把每个 peer 看作独立的客户端。

use crate::error::RelayError;
use crate::route::{CloseReason, Route, RouteEvent, RouteStatsSnapshot};
use peer::DataChannel;
use sessioncast_common::PeerId;
use sessioncast_common::config::RelayConfig;
use sessioncast_common::metrics::ACTIVE_ROUTES;
use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

struct RouteEntry {
    route: Arc<Route>,
    pumps: Vec<AbortHandle>,
}

struct EngineInner {
    config: RelayConfig,
    server_addr: SocketAddr,
    routes: RwLock<HashMap<PeerId, RouteEntry>>,
    events: mpsc::UnboundedSender<RouteEvent>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// 中继引擎
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    pub fn new(
        config: RelayConfig,
        parent: &CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RouteEvent>), RelayError> {
        let server_addr =
            config
                .server_addr()
                .map_err(|_| RelayError::InvalidServerAddress {
                    address: config.server_address.clone(),
                })?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(EngineInner {
            config,
            server_addr,
            routes: RwLock::new(HashMap::new()),
            events: events_tx,
            cancel: parent.child_token(),
            tasks: TaskTracker::new(),
        });
        Ok((Self { inner }, events_rx))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    /// 为已建立的 peer 创建路由并启动转发
    pub async fn attach(
        &self,
        peer: PeerId,
        channel: Arc<dyn DataChannel>,
    ) -> Result<(), RelayError> {
        if self.inner.cancel.is_cancelled() {
            return Err(RelayError::ShuttingDown);
        }
        if self.inner.routes.read().await.contains_key(&peer) {
            return Err(RelayError::DuplicateRoute { peer });
        }

        let socket = self.open_socket().await?;
        let mut routes = self.inner.routes.write().await;
        if routes.contains_key(&peer) {
            return Err(RelayError::DuplicateRoute { peer });
        }

        let route = Arc::new(Route::new(
            peer,
            channel,
            socket,
            self.inner.cancel.child_token(),
            self.inner.config.queue_depth,
            self.inner.config.liveness_timeout(),
            self.inner.config.max_datagram_size,
        ));
        let local_addr = route
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());

        let pumps = vec![
            self.spawn_pump(route.clone(), route.clone().socket_reader()),
            self.spawn_pump(route.clone(), route.clone().channel_writer()),
            self.spawn_pump(route.clone(), route.clone().channel_reader()),
        ];
        routes.insert(peer, RouteEntry { route, pumps });
        ACTIVE_ROUTES.inc();

        info!(
            "Relay route for {} attached via {} -> {}",
            peer, local_addr, self.inner.server_addr
        );
        Ok(())
    }

    async fn open_socket(&self) -> Result<UdpSocket, RelayError> {
        let server = self.inner.server_addr;
        let bind_addr: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket_err = |source| RelayError::Socket {
            server: server.to_string(),
            source,
        };

        let socket = UdpSocket::bind(bind_addr).await.map_err(socket_err)?;
        socket.connect(server).await.map_err(socket_err)?;
        Ok(socket)
    }

    fn spawn_pump<F>(&self, route: Arc<Route>, pump: F) -> AbortHandle
    where
        F: Future<Output = Option<CloseReason>> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner
            .tasks
            .spawn(async move {
                let reason = pump.await;
                if route.pump_finished(reason) {
                    inner.finalize(route).await;
                }
            })
            .abort_handle()
    }

    /// 主动拆除路由；返回路由是否存在
    pub async fn detach(&self, peer: PeerId) -> bool {
        match self.inner.routes.read().await.get(&peer) {
            Some(entry) => {
                debug!("Detaching relay route for {}", peer);
                entry.route.close_with(CloseReason::Detached);
                true
            }
            None => false,
        }
    }

    pub async fn route_count(&self) -> usize {
        self.inner.routes.read().await.len()
    }

    /// 各路由的统计快照
    pub async fn routes_snapshot(&self) -> Vec<(PeerId, RouteStatsSnapshot)> {
        let routes = self.inner.routes.read().await;
        let mut snapshot: Vec<_> = routes
            .iter()
            .map(|(peer, entry)| (*peer, entry.route.stats()))
            .collect();
        snapshot.sort_by_key(|(peer, _)| *peer);
        snapshot
    }

    /// 关闭全部路由
    ///
    /// 先对每个通道发出关闭，等待转发任务在 `grace` 内退出，超时后强制中止剩余任务。
    pub async fn close_all(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let routes: Vec<Arc<Route>> = self
            .inner
            .routes
            .read()
            .await
            .values()
            .map(|entry| entry.route.clone())
            .collect();
        if !routes.is_empty() {
            info!("Closing {} relay routes", routes.len());
        }
        for route in &routes {
            route.close_with(CloseReason::Shutdown);
            route.channel.close().await;
        }

        self.inner.tasks.close();
        if tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_ok()
        {
            return;
        }

        warn!("Relay pumps did not stop within {:?}, aborting", grace);
        let leftovers: Vec<(PeerId, RouteEntry)> =
            self.inner.routes.write().await.drain().collect();
        for (peer, entry) in leftovers {
            for pump in &entry.pumps {
                pump.abort();
            }
            ACTIVE_ROUTES.dec();
            self.inner.emit_closed(peer, &entry.route);
        }
    }
}

impl EngineInner {
    /// 最后一个转发任务退出后调用
    async fn finalize(&self, route: Arc<Route>) {
        let removed = {
            let mut routes = self.routes.write().await;
            match routes.get(&route.peer) {
                Some(entry) if Arc::ptr_eq(&entry.route, &route) => {
                    routes.remove(&route.peer);
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return;
        }

        route.channel.close().await;
        ACTIVE_ROUTES.dec();
        self.emit_closed(route.peer, &route);
    }

    fn emit_closed(&self, peer: PeerId, route: &Route) {
        let reason = route.reason();
        let stats = route.stats();
        info!(
            "Relay route for {} closed ({}): {} bytes to peer, {} bytes to server, {} dropped",
            peer, reason, stats.bytes_to_peer, stats.bytes_to_local, stats.datagrams_dropped
        );
        let _ = self.events.send(RouteEvent::Closed {
            peer,
            reason,
            stats,
        });
    }
}
