//! 编排器使用的信令接口

use async_trait::async_trait;
use auth::CredentialManager;
use sessioncast_common::NetworkId;
use sessioncast_common::config::SignalingConfig;
use signaling::{SignalEvent, SignalSink, SignalingChannel, SignalingError};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// 信令链路：发送（[`SignalSink`]）、取事件流、关闭
#[async_trait]
pub trait SignalingLink: SignalSink {
    /// 取走事件流，只能调用一次
    fn events(&self) -> Result<ReceiverStream<SignalEvent>, SignalingError>;

    async fn close(&self);
}

#[async_trait]
impl SignalingLink for SignalingChannel {
    fn events(&self) -> Result<ReceiverStream<SignalEvent>, SignalingError> {
        self.receive()
    }

    async fn close(&self) {
        SignalingChannel::close(self).await;
    }
}

/// 打开桥接使用的信令通道
///
/// 通道有自己的取消令牌，只在停止流程的最后由 [`SignalingLink::close`] 关闭：
/// 停止信号到达时 peer 和会话记录仍需要它。
pub async fn open_signaling(
    config: &SignalingConfig,
    network_id: NetworkId,
    credentials: Arc<CredentialManager>,
) -> Result<SignalingChannel, SignalingError> {
    SignalingChannel::connect(config, network_id, credentials, &CancellationToken::new()).await
}
