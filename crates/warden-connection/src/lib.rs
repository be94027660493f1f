//! # warden-connection
//!
//! ## 定位与职责（Why）
//! - 维护“后端是否可达”的唯一事实来源，并在链路失效后以有界的指数退避驱动恢复；
//! - 为 HTTP 层与动态路由初始化器提供 `ensure_connected` 前置检查，避免在确定断线时发起注定失败的请求。
//!
//! ## 架构嵌入（Where）
//! - `state`：对外可见的状态快照与三态枚举；
//! - `probe`：健康探测契约与“永不外抛”的执行包装；
//! - `listener`：状态迁移的同步扇出，单个监听者 panic 不影响其余监听者；
//! - `manager`：状态机本体，持有周期检查与延迟重连两个后台任务。
//!
//! ## 并发模型（Trade-offs）
//! - 状态位于 `parking_lot::Mutex` 中，锁从不跨越 `.await`；
//! - 后台任务只持有 `Weak` 引用，管理器的生命周期完全由调用方持有的句柄决定。

mod error;
mod listener;
mod manager;
mod probe;
mod state;

pub use error::ConnectionError;
pub use listener::{ConnectionListener, ListenerId};
pub use manager::{ConnectionManager, ConnectivitySignal, WeakConnectionManager};
pub use probe::{HealthProbe, run_probe};
pub use state::{ConnectionPhase, ConnectionState};
