//! 日志安装入口与稳定的 tracing target 名称。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主进程只需调用一次 [`install`]，即可获得 `fmt + EnvFilter` 的结构化日志；
//!   各 crate 的日志统一挂在 [`targets`] 下的稳定 target 上，便于按组件过滤（`RUST_LOG=warden::connection=debug`）。
//! - **契约（What）**：重复调用返回 [`InstallError::AlreadyInstalled`]；若外部已设置全局 Subscriber，
//!   返回 [`InstallError::SubscriberAlreadySet`]，不会覆盖调用方的配置。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// 稳定的 tracing target。
pub mod targets {
    pub const CONNECTION: &str = "warden::connection";
    pub const HTTP: &str = "warden::http";
    pub const TRANSFORM: &str = "warden::router::transform";
    pub const REGISTRY: &str = "warden::router::registry";
    pub const INITIALIZER: &str = "warden::router::initializer";
    pub const GUARD: &str = "warden::router::guard";
    pub const PERMISSION: &str = "warden::router::permission";
    pub const EVENTS: &str = "warden::events";
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装错误。
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("warden tracing subscriber is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber was set by someone else")]
    SubscriberAlreadySet,
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局日志订阅者。
///
/// `default_directive` 在环境变量 `RUST_LOG` 缺失时生效，例如 `"info"` 或 `"warden=debug"`。
pub fn install(default_directive: &str) -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}
