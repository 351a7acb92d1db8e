//! 数据报中继
//!
//! 每个已建立的 peer 获得一条中继路由：一个连接到本地游戏服务器的专用 UDP socket，
//! 加上两个方向各自独立的转发任务。数据报原样转发，不解析、不重排。
//!
//! # 模块结构
//! - [`queue`]: 本地→peer 方向的有界丢旧队列
//! - [`route`]: 单条路由的三个转发任务
//! - [`engine`]: 路由表、关闭与事件

pub mod engine;
pub mod error;
pub mod queue;
pub mod route;

pub use engine::RelayEngine;
pub use error::RelayError;
pub use queue::DropOldestQueue;
pub use route::{CloseReason, RouteEvent, RouteStatsSnapshot};
