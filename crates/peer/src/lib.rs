//! Peer 连接管理
//!
//! 把信令通道送来的 join / answer / candidate 驱动到一条打开的 data channel。
//!
//! # 模块结构
//! - [`state`]: 协商状态机
//! - [`transport`]: `PeerTransport` / `TransportFactory` / `DataChannel` 抽象
//! - [`rtc`]: 基于 `webrtc` crate 的生产实现
//! - [`memory`]: 进程内 data channel
//! - [`manager`]: 协商任务与连接表

pub mod error;
pub mod manager;
pub mod memory;
pub mod rtc;
pub mod state;
pub mod transport;

pub use error::{ChannelError, NegotiationError};
pub use manager::{PeerConnection, PeerConnectionManager, PeerEvent};
pub use memory::MemoryDataChannel;
pub use state::{NegotiationEvent, NegotiationState};
pub use rtc::{WebRtcTransport, WebRtcTransportFactory};
pub use transport::{DataChannel, PeerTransport, TransportFactory};
