//! # sessioncast
//!
//! 把本机 UDP 游戏服务器发布到 Xbox Live 会话目录，并通过 WebRTC data channel
//! 把加入的玩家中继到该服务器。
//!
//! 各组件位于独立 crate（`auth`、`directory`、`signaling`、`peer`、`relay`），
//! 本 crate 提供编排器 [`SessionBridge`] 和命令行入口。

pub mod bridge;
pub mod error;

pub use bridge::{
    BridgeComponents, BridgeExit, BridgeState, SessionBridge, SignalingLink, open_signaling,
};
pub use error::{Error, Result};
pub use sessioncast_common::config::BridgeConfig;
