use std::sync::Arc;

use warden_core::observability::targets;
use warden_core::{CredentialStore, StorageError};

use crate::permission::PermissionStore;
use crate::registry::{RouteOrigin, RouterEngine};

/// 登出后的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogoutReport {
    /// 从路由引擎中移除的动态路由数量。
    pub removed_routes: usize,
}

/// 会话生命周期：目前只承载登出。
///
/// 登出依次清空凭据、复位权限状态（含持久化副本）、注销全部动态路由；
/// 静态路由保持不变，下一次登录后的首次导航会重新装载动态路由。
/// 登出时仍在进行的初始化会被丢弃，不会把上一位用户的路由写回。
#[derive(Clone)]
pub struct Session {
    credentials: Arc<dyn CredentialStore>,
    permissions: Arc<PermissionStore>,
    engine: Arc<dyn RouterEngine>,
}

impl Session {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        permissions: Arc<PermissionStore>,
        engine: Arc<dyn RouterEngine>,
    ) -> Self {
        Self {
            credentials,
            permissions,
            engine,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.token().is_some()
    }

    pub fn logout(&self) -> Result<LogoutReport, StorageError> {
        self.credentials.clear();
        // 先推进纪元：进行中的初始化要么已提交完毕，要么再也无法提交。
        let reset = self.permissions.reset();
        let removed_routes = self.engine.remove_origin(RouteOrigin::Dynamic);
        reset?;
        tracing::info!(target: targets::PERMISSION, removed_routes, "session cleared");
        Ok(LogoutReport { removed_routes })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
