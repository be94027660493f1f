#![deny(unsafe_code)]
#![doc = "warden-core: 动态路由授权管线与连接韧性层共享的核心契约。"]
#![doc = ""]
#![doc = "== 分层约定 =="]
#![doc = "1. 本 crate 不依赖任何具体传输或路由实现，只承载跨层共享的类型与 trait。"]
#![doc = "2. `warden-connection`、`warden-http`、`warden-router` 均以本 crate 为唯一公共依赖，避免环形引用。"]
#![doc = "3. 错误统一收敛为 [`CoreError`]，各实现 crate 的细粒度错误通过 `From` 转换接入。"]

/// 认证上下文（令牌、用户标识与角色集合）的存取契约。
pub mod auth;
pub mod config;
pub mod error;
/// 进程内事件广播：路由、标签页与连接状态的变更通知。
pub mod event;
pub mod observability;
pub mod retry;
pub mod route;
pub mod storage;
pub mod time;

pub use auth::{CredentialStore, MemoryCredentials};
pub use config::{ConfigError, ConnectionConfig, HttpConfig, RoutesConfig, StorageConfig, WardenConfig};
pub use error::{CoreError, ErrorCategory, ErrorCause, Result, RetryAdvice, codes};
pub use event::{EventBus, WardenEvent};
pub use retry::BackoffPolicy;
pub use route::{RouteDescriptor, RouteMeta, RouteSource, TabItem};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, open_store};
pub use time::{Clock, Sleep, SystemClock};
