//! 会话信令通道
//!
//! 与信令服务保持一条以本机 network id 为作用域的 WebSocket 长连接，
//! 用于和连接中的玩家交换 offer / answer / ICE candidate。
//!
//! # 模块结构
//! - [`message`]: 线上帧格式与信令文本
//! - [`event`]: 交给编排器的类型化事件
//! - [`channel`]: 连接、重连、保活与收发

pub mod channel;
pub mod error;
pub mod event;
pub mod message;

pub use channel::{SignalSink, SignalingChannel};
pub use error::SignalingError;
pub use event::SignalEvent;
pub use message::{IceServer, Signal};
