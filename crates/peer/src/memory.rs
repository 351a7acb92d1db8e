//! 进程内 data channel
//!
//! 两端共享一个关闭标记，任一端关闭后双方的 `recv` 都会结束。
//! 用于本地回环以及不经过 ICE 的集成测试。

use crate::error::ChannelError;
use crate::transport::DataChannel;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

const DEFAULT_CAPACITY: usize = 1024;

pub struct MemoryDataChannel {
    outbound: mpsc::Sender<Bytes>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
}

impl MemoryDataChannel {
    /// 创建一对互相连接的通道
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        let a = Arc::new(Self {
            outbound: a_tx,
            inbound: Mutex::new(a_rx),
            closed: closed.clone(),
        });
        let b = Arc::new(Self {
            outbound: b_tx,
            inbound: Mutex::new(b_rx),
            closed,
        });
        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl DataChannel for MemoryDataChannel {
    async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .send(data)
            .await
            .map_err(|_| ChannelError::Closed)
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
    }
}
