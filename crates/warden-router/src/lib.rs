//! # warden-router
//!
//! ## 定位与职责（Why）
//! - 把后端下发的授权路由描述装进可热更新的路由表，并在每次导航前完成认证、装载与授权判定；
//! - 动态路由的装载必须幂等、单飞、有界重试，失败时按认证失效、重试耗尽、会话已结束与内部异常分别处理。
//!
//! ## 架构嵌入（Where）
//! - `resolved` / `transform`：后端描述到引擎节点的纯变换；
//! - `registry`：[`RouterEngine`] 契约与基于 `ArcSwap` 的 [`RouteRegistry`]；
//! - `permission`：路由集合、加载标记与标签页的 [`PermissionStore`]；
//! - `initializer`：单飞的 [`DynamicRouteInitializer`]；
//! - `guard` / `navigator`：导航守卫与驱动守卫的门面；
//! - `session`：登出时的统一清理。
//!
//! ## 并发模型（Trade-offs）
//! - 读多写少：路由表整表替换，守卫读取无需加锁；
//! - 权限状态的读写锁从不跨越 `.await`；初始化任务以 `tokio::spawn` 独立运行，
//!   发起导航的调用方放弃等待不会打断拉取。

mod guard;
mod initializer;
mod navigator;
mod permission;
mod registry;
mod resolved;
mod session;
mod transform;

pub use guard::{
    LoadingGuard, LoadingIndicator, NavigationDecision, NavigationFailure, NavigationGuard,
    NoopIndicator, RedirectReason, UnauthorizedAttempt, classify_failure, roles_intersect,
};
pub use initializer::{DynamicRouteInitializer, InitDynamicRouteError, InitReport};
pub use navigator::{NavigationOutcome, Navigator};
pub use permission::{CloseTab, PermissionState, PermissionStore};
pub use registry::{
    RegisteredRoute, RegistrationError, RegistrationReport, RouteMatch, RouteOrigin,
    RouteRegistry, RouterEngine,
};
pub use resolved::{ResolvedRoute, ResolvedRouteKind, Walk};
pub use session::{LogoutReport, Session};
pub use transform::{DropReason, DroppedRoute, TransformOutcome, transform};
