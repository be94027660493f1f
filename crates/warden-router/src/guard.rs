//! 导航守卫：每次导航前的认证、装载与授权判定。
//!
//! # 教案式说明
//! - **意图（Why）**：把“是否登录、动态路由是否就绪、角色是否匹配、目标是否存在”四类判断
//!   收敛到一个纯决策函数，宿主路由引擎只需执行返回的 [`NavigationDecision`]；
//! - **契约（What）**：
//!   - 守卫边界内不向外抛出任何错误，所有失败都折算为跳转决策；
//!   - 进入时点亮加载指示，任何退出路径（含 panic 展开）都会熄灭，由 [`LoadingGuard`] 的 `Drop` 保证；
//!   - 越权访问写入有界审计环，超出容量时淘汰最旧记录；
//! - **实现（How）**：判定顺序依次为错误页与白名单、令牌、动态路由装载、角色交集、注册检查，
//!   全部通过后打开并激活对应标签页。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use warden_core::observability::targets;
use warden_core::{
    Clock, CoreError, CredentialStore, ErrorCategory, RouteDescriptor, RoutesConfig, TabItem,
};

use crate::initializer::{DynamicRouteInitializer, InitDynamicRouteError};
use crate::permission::PermissionStore;
use crate::registry::{RegisteredRoute, RouterEngine};

/// 查询参数值的编码集合：保留 RFC 3986 非保留字符，其余一律转义（`/` 编码为 `%2F`）。
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 全局加载指示（例如页面顶部进度条）。
pub trait LoadingIndicator: Send + Sync + 'static {
    fn start(&self);

    fn done(&self);
}

/// 不做任何事的指示器。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopIndicator;

impl LoadingIndicator for NoopIndicator {
    fn start(&self) {}

    fn done(&self) {}
}

/// 作用域内点亮指示器，离开作用域时熄灭。
pub struct LoadingGuard<'a> {
    indicator: &'a dyn LoadingIndicator,
}

impl<'a> LoadingGuard<'a> {
    pub fn start(indicator: &'a dyn LoadingIndicator) -> Self {
        indicator.start();
        Self { indicator }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.indicator.done();
    }
}

/// 跳转原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectReason {
    /// 未登录或认证上下文失效。
    Unauthenticated,
    /// 角色不匹配，或装载失败被判定为权限问题。
    Forbidden,
    NotFound,
    /// 装载失败且与权限无关。
    ServerError,
}

/// 守卫的决策。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Redirect { to: String, reason: RedirectReason },
    /// 动态路由刚装载完毕，需以 `replace` 方式重新发起原导航，使新路由参与匹配。
    Redispatch { path: String, replace: bool },
}

impl NavigationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// 跳转或重新派发的目标路径。
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Redirect { to, .. } => Some(to),
            Self::Redispatch { path, .. } => Some(path),
        }
    }
}

/// 路由引擎层面的导航失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationFailure {
    /// 重复导航到当前位置。
    Duplicated,
    /// 导航被后续导航或钩子中止。
    Aborted,
}

/// 一次越权访问记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnauthorizedAttempt {
    pub path: String,
    pub route: String,
    pub required: Vec<String>,
    pub held: Vec<String>,
    pub at: Instant,
}

/// 导航守卫。
pub struct NavigationGuard {
    config: RoutesConfig,
    credentials: Arc<dyn CredentialStore>,
    permissions: Arc<PermissionStore>,
    engine: Arc<dyn RouterEngine>,
    initializer: DynamicRouteInitializer,
    clock: Arc<dyn Clock>,
    indicator: Arc<dyn LoadingIndicator>,
    static_routes: Vec<RouteDescriptor>,
    debug: bool,
    audit: Mutex<VecDeque<UnauthorizedAttempt>>,
}

impl NavigationGuard {
    pub fn new(
        config: RoutesConfig,
        credentials: Arc<dyn CredentialStore>,
        engine: Arc<dyn RouterEngine>,
        initializer: DynamicRouteInitializer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            permissions: Arc::clone(initializer.permissions()),
            audit: Mutex::new(VecDeque::with_capacity(config.audit_capacity)),
            config,
            credentials,
            engine,
            initializer,
            clock,
            indicator: Arc::new(NoopIndicator),
            static_routes: Vec::new(),
            debug: false,
        }
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn LoadingIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// 首次装载时写入权限状态的静态路由。
    pub fn with_static_routes(mut self, routes: Vec<RouteDescriptor>) -> Self {
        self.static_routes = routes;
        self
    }

    /// 装载成功后逐条输出注册的路由。
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn config(&self) -> &RoutesConfig {
        &self.config
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    /// 导航前判定。`to` 可携带查询串与片段。
    pub async fn before_each(&self, to: &str) -> NavigationDecision {
        let _loading = LoadingGuard::start(self.indicator.as_ref());
        let path = path_of(to);

        if self.config.is_error_page(path) || self.config.is_public(path) {
            return NavigationDecision::Allow;
        }

        if self.credentials.token().is_none() {
            tracing::debug!(target: targets::GUARD, to, "no token; redirecting to login");
            return self.login_redirect(to);
        }

        if !self.permissions.is_loaded() {
            return self.load_then_redispatch(to).await;
        }

        let Some(found) = self.engine.resolve(to) else {
            tracing::debug!(target: targets::GUARD, to, "no registered route matches");
            return self.redirect(RedirectReason::NotFound);
        };

        let held = self.credentials.roles();
        if !roles_intersect(found.route.meta.required_roles(), &held) {
            self.record_unauthorized(to, &found.route, held);
            return self.redirect(RedirectReason::Forbidden);
        }

        self.permissions.open_tab(tab_for(&found.route, to));
        NavigationDecision::Allow
    }

    /// 路由引擎报告导航失败时的兜底决策。
    pub fn on_navigation_failure(&self, to: &str, failure: NavigationFailure) -> NavigationDecision {
        tracing::warn!(target: targets::GUARD, to, ?failure, "navigation failed");
        self.redirect(RedirectReason::NotFound)
    }

    /// 越权访问审计记录，按时间先后排列。
    pub fn unauthorized_attempts(&self) -> Vec<UnauthorizedAttempt> {
        self.audit.lock().iter().cloned().collect()
    }

    async fn load_then_redispatch(&self, to: &str) -> NavigationDecision {
        let result = self
            .initializer
            .init_dynamic_routes(self.static_routes.clone(), self.debug)
            .await;

        match result {
            Ok(_) => self.redispatch(to),
            Err(InitDynamicRouteError::Exhausted { attempts, .. }) => {
                tracing::warn!(
                    target: targets::GUARD,
                    to,
                    attempts,
                    loaded = self.permissions.is_loaded(),
                    "dynamic routes unavailable; continuing with static routes"
                );
                self.redispatch(to)
            }
            Err(InitDynamicRouteError::Fatal { code, message }) => {
                tracing::warn!(target: targets::GUARD, to, code, %message, "clearing credentials");
                self.credentials.clear();
                self.login_redirect(to)
            }
            Err(InitDynamicRouteError::Superseded) => {
                tracing::debug!(target: targets::GUARD, to, "session changed during initialization");
                if self.credentials.token().is_none() {
                    self.login_redirect(to)
                } else {
                    self.redispatch(to)
                }
            }
            Err(err @ InitDynamicRouteError::Internal(_)) => {
                let core = CoreError::from(err);
                let reason = classify_failure(&core);
                tracing::error!(target: targets::GUARD, to, error = %core, ?reason, "route initialization failed");
                self.redirect(reason)
            }
        }
    }

    fn redispatch(&self, to: &str) -> NavigationDecision {
        NavigationDecision::Redispatch {
            path: to.to_owned(),
            replace: true,
        }
    }

    fn login_redirect(&self, to: &str) -> NavigationDecision {
        let encoded = utf8_percent_encode(to, QUERY_VALUE);
        NavigationDecision::Redirect {
            to: format!(
                "{}?{}={}",
                self.config.login_path, self.config.redirect_query_key, encoded
            ),
            reason: RedirectReason::Unauthenticated,
        }
    }

    fn redirect(&self, reason: RedirectReason) -> NavigationDecision {
        let to = match reason {
            RedirectReason::Unauthenticated => self.config.login_path.clone(),
            RedirectReason::Forbidden => self.config.forbidden_path.clone(),
            RedirectReason::NotFound => self.config.not_found_path.clone(),
            RedirectReason::ServerError => self.config.server_error_path.clone(),
        };
        NavigationDecision::Redirect { to, reason }
    }

    fn record_unauthorized(&self, to: &str, route: &RegisteredRoute, held: Vec<String>) {
        let required = route.meta.required_roles().to_vec();
        tracing::warn!(
            target: targets::GUARD,
            to,
            route = %route.name,
            ?required,
            ?held,
            "unauthorized navigation"
        );
        let capacity = self.config.audit_capacity;
        if capacity == 0 {
            return;
        }
        let mut audit = self.audit.lock();
        while audit.len() >= capacity {
            audit.pop_front();
        }
        audit.push_back(UnauthorizedAttempt {
            path: to.to_owned(),
            route: route.name.clone(),
            required,
            held,
            at: self.clock.now(),
        });
    }
}

impl std::fmt::Debug for NavigationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationGuard")
            .field("config", &self.config)
            .field("initializer", &self.initializer)
            .field("audit", &self.audit.lock().len())
            .finish()
    }
}

/// 装载失败的归类：先看分类，再看消息。
pub fn classify_failure(err: &CoreError) -> RedirectReason {
    match err.category() {
        ErrorCategory::Security | ErrorCategory::Unauthenticated => RedirectReason::Forbidden,
        _ => {
            let message = err.message().to_ascii_lowercase();
            let permission_related = ["permission", "forbidden", "unauthorized", "403"]
                .iter()
                .any(|needle| message.contains(needle));
            if permission_related {
                RedirectReason::Forbidden
            } else {
                RedirectReason::ServerError
            }
        }
    }
}

/// 要求为空时恒为真，否则要求与持有的角色至少有一个交集。
pub fn roles_intersect(required: &[String], held: &[String]) -> bool {
    if required.is_empty() {
        return true;
    }
    let held: HashSet<&str> = held.iter().map(String::as_str).collect();
    required.iter().any(|role| held.contains(role.as_str()))
}

fn path_of(to: &str) -> &str {
    let end = to.find(['?', '#']).unwrap_or(to.len());
    &to[..end]
}

fn tab_for(route: &RegisteredRoute, to: &str) -> TabItem {
    let meta = &route.meta;
    let fixed = meta.fixed.unwrap_or(false);
    TabItem {
        name: route.name.clone(),
        path: to.to_owned(),
        label: meta.title_key.clone().unwrap_or_else(|| route.name.clone()),
        active: true,
        icon: meta.icon.clone(),
        fixed,
        deletable: meta.deletable.unwrap_or(!fixed),
    }
}
