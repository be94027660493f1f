use std::sync::Arc;

use parking_lot::Mutex;
use warden_core::observability::targets;

use crate::guard::{NavigationDecision, NavigationFailure, NavigationGuard, RedirectReason};

/// 一次导航的最终结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// 到达目标；`redispatched` 表示中途因装载动态路由重新派发过一次。
    Arrived { path: String, redispatched: bool },
    Redirected {
        from: String,
        to: String,
        reason: RedirectReason,
    },
    /// 目标与当前位置相同，未发生导航。
    Unchanged,
}

impl NavigationOutcome {
    /// 导航结束后的位置。
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Arrived { path, .. } => Some(path),
            Self::Redirected { to, .. } => Some(to),
            Self::Unchanged => None,
        }
    }
}

/// 驱动守卫决策的导航门面。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// 宿主路由引擎之外的调用方（命令行工具、集成测试）也需要“完整走一遍导航”的能力：
/// 执行守卫、跟随一次重新派发、落定当前位置。
///
/// ## 逻辑 (How)
/// 1. 目标与当前位置相同直接返回 [`NavigationOutcome::Unchanged`]；
/// 2. 执行守卫；`Redispatch` 时以替换方式再执行一次，再次要求派发视为导航被中止，
///    交给 [`NavigationGuard::on_navigation_failure`] 兜底；
/// 3. `Redirect` 的目标是登录页或错误页，这些路径始终放行，直接落定。
#[derive(Debug)]
pub struct Navigator {
    guard: Arc<NavigationGuard>,
    current: Mutex<Option<String>>,
}

impl Navigator {
    pub fn new(guard: Arc<NavigationGuard>) -> Self {
        Self {
            guard,
            current: Mutex::new(None),
        }
    }

    pub fn guard(&self) -> &Arc<NavigationGuard> {
        &self.guard
    }

    /// 当前位置。
    pub fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub async fn navigate(&self, to: &str) -> NavigationOutcome {
        if self.current.lock().as_deref() == Some(to) {
            return NavigationOutcome::Unchanged;
        }

        let mut redispatched = false;
        let mut decision = self.guard.before_each(to).await;
        if let NavigationDecision::Redispatch { path, replace } = decision {
            tracing::debug!(target: targets::GUARD, path = %path, replace, "re-dispatching navigation");
            redispatched = true;
            decision = match self.guard.before_each(&path).await {
                NavigationDecision::Redispatch { .. } => {
                    self.guard.on_navigation_failure(to, NavigationFailure::Aborted)
                }
                next => next,
            };
        }

        let outcome = match decision {
            NavigationDecision::Allow => NavigationOutcome::Arrived {
                path: to.to_owned(),
                redispatched,
            },
            NavigationDecision::Redirect { to: target, reason } => NavigationOutcome::Redirected {
                from: to.to_owned(),
                to: target,
                reason,
            },
            NavigationDecision::Redispatch { path, .. } => NavigationOutcome::Arrived {
                path,
                redispatched,
            },
        };
        if let Some(location) = outcome.location() {
            *self.current.lock() = Some(location.to_owned());
        }
        outcome
    }

    /// 清空当前位置，例如登出之后。
    pub fn reset(&self) {
        self.current.lock().take();
    }
}
