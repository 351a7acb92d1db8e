//! Xbox Live 身份认证
//!
//! - [`CredentialManager`]：持有当前令牌，在过期余量内提前刷新，并发调用共享同一次刷新
//! - [`IdentityProvider`]：身份提供方抽象，生产实现为 [`XboxLiveProvider`]
//! - [`device_code`]：首次运行时通过设备码登录获取 refresh token

pub mod claims;
pub mod device_code;
pub mod error;
pub mod manager;
pub mod provider;
pub mod token;

pub use error::AuthError;
pub use manager::CredentialManager;
pub use provider::{IdentityProvider, ProviderError, XboxLiveProvider};
pub use token::IdentityToken;
