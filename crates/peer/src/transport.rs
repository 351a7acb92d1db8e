//! 传输抽象
//!
//! 协商状态机只通过这几个 trait 操作 WebRTC，生产实现见 [`crate::rtc`]，
//! 内存实现见 [`crate::memory`]。

use crate::error::{ChannelError, NegotiationError};
use async_trait::async_trait;
use bytes::Bytes;
use signaling::IceServer;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 单个 peer 的 WebRTC 传输
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// 作为 offer 方：打开 data channel 并生成本地 offer
    async fn create_offer(&self) -> Result<String, NegotiationError>;

    /// 作为 answer 方：应用远端 offer 并生成本地 answer
    async fn create_answer(&self, offer: &str) -> Result<String, NegotiationError>;

    /// 应用远端 answer
    async fn apply_answer(&self, answer: &str) -> Result<(), NegotiationError>;

    /// 添加远端 ICE candidate，调用方保证此时远端描述已生效
    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), NegotiationError>;

    /// 本地 candidate 流，只能取走一次；再次调用得到一个已关闭的接收端
    fn local_candidates(&self) -> mpsc::UnboundedReceiver<String>;

    /// 等待 data channel 打开
    async fn open_data_channel(&self) -> Result<Arc<dyn DataChannel>, NegotiationError>;

    async fn close(&self);
}

/// 按当前 ICE 服务器列表创建传输
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError>;
}

/// 已打开的 data channel，按消息收发
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<(), ChannelError>;

    /// 通道关闭后返回 `None`
    async fn recv(&self) -> Option<Bytes>;

    async fn close(&self);
}
