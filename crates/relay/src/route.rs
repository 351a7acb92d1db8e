//! 单条中继路由
//!
//! 三个转发任务共享一个 [`Route`]：
//! - socket reader：本地 UDP → 丢旧队列，永不阻塞
//! - channel writer：丢旧队列 → data channel
//! - channel reader：data channel → 本地 UDP，同时负责 liveness 超时
//!
//! 任一任务退出都会取消整条路由，最后退出的任务负责收尾。

use crate::queue::DropOldestQueue;
use bytes::Bytes;
use peer::{ChannelError, DataChannel};
use sessioncast_common::PeerId;
use sessioncast_common::metrics::{RELAY_BYTES, RELAY_DROPPED};
use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub(crate) const PUMP_COUNT: usize = 3;

/// 路由关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端关闭了 data channel
    ChannelClosed,
    /// 超过 liveness 时限没有收到 peer 数据
    LivenessTimeout,
    /// 本地 socket 错误
    Socket(String),
    /// data channel 发送错误
    Channel(String),
    /// 调用方主动拆除
    Detached,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed => f.write_str("channel closed"),
            Self::LivenessTimeout => f.write_str("liveness timeout"),
            Self::Socket(e) => write!(f, "socket error: {e}"),
            Self::Channel(e) => write!(f, "channel error: {e}"),
            Self::Detached => f.write_str("detached"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// 路由统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStatsSnapshot {
    pub bytes_to_peer: u64,
    pub bytes_to_local: u64,
    pub datagrams_to_peer: u64,
    pub datagrams_to_local: u64,
    pub datagrams_dropped: u64,
}

/// 路由事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Closed {
        peer: PeerId,
        reason: CloseReason,
        stats: RouteStatsSnapshot,
    },
}

#[derive(Default)]
struct Counters {
    bytes_to_peer: AtomicU64,
    bytes_to_local: AtomicU64,
    datagrams_to_peer: AtomicU64,
    datagrams_to_local: AtomicU64,
}

pub(crate) struct Route {
    pub(crate) peer: PeerId,
    pub(crate) channel: Arc<dyn DataChannel>,
    pub(crate) cancel: CancellationToken,
    socket: UdpSocket,
    queue: DropOldestQueue<Bytes>,
    counters: Counters,
    reason: Mutex<Option<CloseReason>>,
    remaining: AtomicUsize,
    liveness: Duration,
    max_datagram_size: usize,
}

impl Route {
    pub(crate) fn new(
        peer: PeerId,
        channel: Arc<dyn DataChannel>,
        socket: UdpSocket,
        cancel: CancellationToken,
        queue_depth: usize,
        liveness: Duration,
        max_datagram_size: usize,
    ) -> Self {
        Self {
            peer,
            channel,
            cancel,
            socket,
            queue: DropOldestQueue::new(queue_depth),
            counters: Counters::default(),
            reason: Mutex::new(None),
            remaining: AtomicUsize::new(PUMP_COUNT),
            liveness,
            max_datagram_size,
        }
    }

    /// 记录关闭原因（只保留第一个）并取消所有任务
    pub(crate) fn close_with(&self, reason: CloseReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub(crate) fn reason(&self) -> CloseReason {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or(CloseReason::Shutdown)
    }

    /// 任务退出时调用；返回 true 表示这是最后一个退出的任务
    pub(crate) fn pump_finished(&self, reason: Option<CloseReason>) -> bool {
        match reason {
            Some(reason) => self.close_with(reason),
            None => self.cancel.cancel(),
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    pub(crate) fn stats(&self) -> RouteStatsSnapshot {
        RouteStatsSnapshot {
            bytes_to_peer: self.counters.bytes_to_peer.load(Ordering::Relaxed),
            bytes_to_local: self.counters.bytes_to_local.load(Ordering::Relaxed),
            datagrams_to_peer: self.counters.datagrams_to_peer.load(Ordering::Relaxed),
            datagrams_to_local: self.counters.datagrams_to_local.load(Ordering::Relaxed),
            datagrams_dropped: self.queue.dropped(),
        }
    }

    /// 本地 UDP → 队列
    pub(crate) async fn socket_reader(self: Arc<Self>) -> Option<CloseReason> {
        let mut buf = vec![0u8; self.max_datagram_size];
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                received = self.socket.recv(&mut buf) => received,
            };
            match received {
                Ok(len) => {
                    if self.queue.push(Bytes::copy_from_slice(&buf[..len])) {
                        RELAY_DROPPED.inc();
                        trace!("Queue to {} full, dropped oldest datagram", self.peer);
                    }
                }
                // 游戏服务器未监听时内核回送的 ICMP，服务器重启后会恢复
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!("Local server refused datagram for {}", self.peer);
                }
                Err(e) => return Some(CloseReason::Socket(e.to_string())),
            }
        }
    }

    /// 队列 → data channel
    pub(crate) async fn channel_writer(self: Arc<Self>) -> Option<CloseReason> {
        loop {
            let data = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                data = self.queue.pop() => data,
            };
            let len = data.len() as u64;
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                sent = self.channel.send(data) => sent,
            };
            match sent {
                Ok(()) => {
                    self.counters.bytes_to_peer.fetch_add(len, Ordering::Relaxed);
                    self.counters.datagrams_to_peer.fetch_add(1, Ordering::Relaxed);
                    RELAY_BYTES.with_label_values(&["local_to_peer"]).inc_by(len);
                }
                Err(ChannelError::Closed) => return Some(CloseReason::ChannelClosed),
                Err(e) => return Some(CloseReason::Channel(e.to_string())),
            }
        }
    }

    /// data channel → 本地 UDP
    pub(crate) async fn channel_reader(self: Arc<Self>) -> Option<CloseReason> {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                received = tokio::time::timeout(self.liveness, self.channel.recv()) => received,
            };
            let data = match received {
                Err(_) => return Some(CloseReason::LivenessTimeout),
                Ok(None) => return Some(CloseReason::ChannelClosed),
                Ok(Some(data)) => data,
            };
            if data.len() > self.max_datagram_size {
                warn!(
                    "Dropping {}-byte message from {}: exceeds max datagram size",
                    data.len(),
                    self.peer
                );
                continue;
            }
            match self.socket.send(&data).await {
                Ok(_) => {
                    let len = data.len() as u64;
                    self.counters.bytes_to_local.fetch_add(len, Ordering::Relaxed);
                    self.counters.datagrams_to_local.fetch_add(1, Ordering::Relaxed);
                    RELAY_BYTES.with_label_values(&["peer_to_local"]).inc_by(len);
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!("Local server refused datagram from {}", self.peer);
                }
                Err(e) => return Some(CloseReason::Socket(e.to_string())),
            }
        }
    }
}
