//! 通用工具模块

pub mod backoff;

pub use backoff::Backoff;
