//! 会话目录客户端
//!
//! 在目录服务中维护一条可被发现的多人会话记录：
//! - [`DirectoryClient::publish`] 以新的会话名创建记录
//! - [`DirectoryClient::heartbeat`] 刷新可见性
//! - [`DirectoryClient::withdraw`] 移除本机成员身份，从而删除记录

pub mod client;
pub mod descriptor;
pub mod error;

pub use client::{DirectoryClient, SessionDirectory};
pub use descriptor::{SessionDescriptor, SessionHandle};
pub use error::DirectoryError;
